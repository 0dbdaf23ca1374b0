//! XZ compression stage.

use crate::engine::pipeline::replace_with;
use crate::engine::result_error::result::Result;
use liblzma::write::XzEncoder;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::fs::File;
use std::io::{BufReader, BufWriter, IntoInnerError};
use std::path::{Path, PathBuf};
use validator::Validate;

/// Default compression level (balance of speed vs size)
static DEFAULT_COMPRESSION_LEVEL: u32 = 3;

/// Configuration for the XZ (LZMA) compression stage
///
/// A single deterministic stream: the same input always yields the same
/// compressed bytes, which keeps artifact comparisons meaningful.
#[skip_serializing_none]
#[derive(Clone, Default, Validate, Serialize, Deserialize, Debug)]
#[serde(deny_unknown_fields)]
pub struct XzConfig {
    /// Compression level (0-9)
    ///
    /// - 0: Fastest, largest files
    /// - 3: Default balance (good speed/size ratio)
    /// - 9: Slowest, smallest files
    #[validate(range(min = 0, max = 9))]
    level: Option<u32>,
}

impl XzConfig {
    fn level(&self) -> u32 {
        self.level.unwrap_or(DEFAULT_COMPRESSION_LEVEL)
    }
}

/// Compresses the artifact into a `.xz` sibling and removes the input after
/// the replacement is fully written. Returns the new path and its size.
pub fn compress_file(path: &Path, config: &XzConfig) -> Result<(PathBuf, u64)> {
    let level = config.level();
    tracing::debug!("Compressing {:?} with XZ level {}", path, level);
    replace_with(path, "xz", |tmp| {
        let mut reader = BufReader::new(File::open(path)?);
        let mut encoder = XzEncoder::new(BufWriter::new(File::create_new(tmp)?), level);
        std::io::copy(&mut reader, &mut encoder)?;
        encoder
            .finish()?
            .into_inner()
            .map_err(IntoInnerError::into_error)?
            .sync_all()?;
        Ok(())
    })
}
