//! Age encryption stage.
//!
//! The encryption key is derived from the configured passphrase via age's
//! scrypt recipient, so artifacts written by one process instance stay
//! decryptable after a restart as long as the configured secret is kept.

use crate::engine::pipeline::replace_with;
use crate::engine::redacted::RedactedString;
use crate::engine::result_error::result::Result;
use age::secrecy::SecretString;
use bon::Builder;
use getset::Getters;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, IntoInnerError};
use std::path::{Path, PathBuf};
use validator::Validate;

/// Configured secret material for the encryption stage
#[derive(Clone, Debug, Serialize, Deserialize, Validate, Builder, Getters)]
#[serde(deny_unknown_fields)]
#[getset(get = "pub")]
pub struct EncryptionConfig {
    /// Passphrase the artifact key is derived from (redacted in logs)
    #[validate(nested)]
    passphrase: RedactedString,
}

/// Encrypts the artifact into an `.age` sibling and removes the input after
/// the replacement is fully written. Returns the new path and its size.
pub fn encrypt_file(path: &Path, config: &EncryptionConfig) -> Result<(PathBuf, u64)> {
    tracing::debug!("Encrypting {:?} with passphrase-derived key", path);
    let recipient =
        age::scrypt::Recipient::new(SecretString::from(config.passphrase.inner().clone()));
    replace_with(path, "age", |tmp| {
        let mut reader = BufReader::new(File::open(path)?);
        let encryptor =
            age::Encryptor::with_recipients(std::iter::once(&recipient as &dyn age::Recipient))?;
        let mut writer = encryptor.wrap_output(BufWriter::new(File::create_new(tmp)?))?;
        std::io::copy(&mut reader, &mut writer)?;
        writer
            .finish()?
            .into_inner()
            .map_err(IntoInnerError::into_error)?
            .sync_all()?;
        Ok(())
    })
}
