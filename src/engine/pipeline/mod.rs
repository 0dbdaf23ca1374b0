//! Post-processing pipeline: optional compression, then optional encryption.
//!
//! Stage order is fixed. Each enabled stage replaces the artifact file with
//! its transformed successor, and the replacement is atomic with respect to
//! the input: the stage writes a `.tmp` sibling to completion, renames it
//! into place, and only then deletes the input. A stage failure removes the
//! partial output and leaves the input untouched.

pub mod compress;
pub mod encrypt;

use crate::engine::definition::BackupJobDefinition;
use crate::engine::pipeline::compress::XzConfig;
use crate::engine::pipeline::encrypt::EncryptionConfig;
use crate::engine::produce::ArtifactSpec;
use crate::engine::result_error::error::Error;
use crate::engine::result_error::result::Result;
use std::path::{Path, PathBuf};
use tracing::info;

/// Runs the stages enabled by the definition over the produced artifact.
/// `final_size` tracks the size after the last stage that ran; it stays
/// `None` when no stage ran (or nothing was produced).
pub fn post_process(
    mut spec: ArtifactSpec,
    definition: &BackupJobDefinition,
    compression: &XzConfig,
    encryption: Option<&EncryptionConfig>,
) -> Result<ArtifactSpec> {
    let Some(mut path) = spec.path.clone() else {
        return Ok(spec);
    };

    if *definition.compression_enabled() {
        let (compressed, size) =
            compress::compress_file(&path, compression).map_err(|e| Error::PipelineStage {
                stage: "compression",
                error: Box::new(e),
            })?;
        info!(
            "Compressed artifact {:?} -> {:?} ({} -> {} bytes)",
            path, compressed, spec.raw_size, size
        );
        path = compressed;
        spec.final_size = Some(size);
    }

    if *definition.encryption_enabled() {
        let secret = encryption.ok_or(Error::MissingEncryptionSecret);
        let (encrypted, size) = secret
            .and_then(|secret| encrypt::encrypt_file(&path, secret))
            .map_err(|e| Error::PipelineStage {
                stage: "encryption",
                error: Box::new(e),
            })?;
        info!("Encrypted artifact {:?} -> {:?}", path, encrypted);
        path = encrypted;
        spec.final_size = Some(size);
    }

    spec.path = Some(path);
    Ok(spec)
}

/// Appends `ext` to the full file name (`files.tar` + `xz` -> `files.tar.xz`).
fn appended_ext(path: &Path, ext: &str) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(".");
    os.push(ext);
    PathBuf::from(os)
}

/// Write-then-swap shared by both stages. `write` must fully produce the
/// temporary file or fail; the input file is removed only after the rename
/// succeeded.
pub(crate) fn replace_with<F>(src: &Path, ext: &str, write: F) -> Result<(PathBuf, u64)>
where
    F: FnOnce(&Path) -> Result<()>,
{
    let dst = appended_ext(src, ext);
    let tmp = appended_ext(src, &format!("{ext}.tmp"));
    match write(&tmp) {
        Ok(()) => {
            std::fs::rename(&tmp, &dst)?;
            std::fs::remove_file(src)?;
            let size = std::fs::metadata(&dst)?.len();
            Ok((dst, size))
        }
        Err(e) => {
            let _ = std::fs::remove_file(&tmp);
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::definition::{JobType, Recurrence};
    use crate::engine::redacted::RedactedString;
    use std::fs::File;
    use std::io::Read;
    use tempfile::TempDir;

    fn definition(compression: bool, encryption: bool) -> BackupJobDefinition {
        BackupJobDefinition::builder()
            .name("acct")
            .job_type(JobType::Files)
            .recurrence(Recurrence::Hourly)
            .compression_enabled(compression)
            .encryption_enabled(encryption)
            .build()
    }

    fn spec_for(path: &Path) -> ArtifactSpec {
        ArtifactSpec {
            path: Some(path.to_path_buf()),
            raw_size: std::fs::metadata(path).unwrap().len(),
            items_count: 1,
            final_size: None,
        }
    }

    fn encryption_config() -> EncryptionConfig {
        EncryptionConfig::builder()
            .passphrase(RedactedString::builder().inner("correct horse battery").build())
            .build()
    }

    #[test]
    fn test_both_stages_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let artifact = temp_dir.path().join("files_20260301_020000.tar");
        let payload = b"tar bytes".repeat(512);
        std::fs::write(&artifact, &payload).unwrap();

        let enc = encryption_config();
        let processed = post_process(
            spec_for(&artifact),
            &definition(true, true),
            &XzConfig::default(),
            Some(&enc),
        )
        .unwrap();

        let final_path = processed.path.unwrap();
        assert!(final_path.to_string_lossy().ends_with(".tar.xz.age"));
        assert!(!artifact.exists());
        assert_eq!(
            processed.final_size.unwrap(),
            std::fs::metadata(&final_path).unwrap().len()
        );

        // Undo encryption then compression and compare bytes
        let decrypted = encrypt::tests_support::decrypt(&final_path, "correct horse battery");
        let mut decompressed = Vec::new();
        liblzma::read::XzDecoder::new(decrypted.as_slice())
            .read_to_end(&mut decompressed)
            .unwrap();
        assert_eq!(decompressed, payload);
    }

    #[test]
    fn test_stages_skipped_when_disabled() {
        let temp_dir = TempDir::new().unwrap();
        let artifact = temp_dir.path().join("files_20260301_020000.tar");
        std::fs::write(&artifact, b"contents").unwrap();

        let processed = post_process(
            spec_for(&artifact),
            &definition(false, false),
            &XzConfig::default(),
            None,
        )
        .unwrap();

        assert_eq!(processed.path.unwrap(), artifact);
        assert!(processed.final_size.is_none());
        assert!(artifact.exists());
    }

    #[test]
    fn test_no_artifact_is_a_noop() {
        let processed = post_process(
            ArtifactSpec::default(),
            &definition(true, true),
            &XzConfig::default(),
            None,
        )
        .unwrap();
        assert!(processed.path.is_none());
    }

    #[test]
    fn test_encryption_without_secret_fails_stage() {
        let temp_dir = TempDir::new().unwrap();
        let artifact = temp_dir.path().join("files_20260301_020000.tar");
        std::fs::write(&artifact, b"contents").unwrap();

        let result = post_process(
            spec_for(&artifact),
            &definition(false, true),
            &XzConfig::default(),
            None,
        );
        match result {
            Err(Error::PipelineStage { stage, error }) => {
                assert_eq!(stage, "encryption");
                assert!(matches!(*error, Error::MissingEncryptionSecret));
            }
            other => panic!("Expected PipelineStage error, got {other:?}"),
        }
        // Original artifact untouched
        assert!(artifact.exists());
    }

    #[test]
    fn test_replace_with_failure_keeps_input_and_removes_partial() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("artifact.tar");
        std::fs::write(&src, b"original").unwrap();

        let result = replace_with(&src, "xz", |tmp| {
            File::create_new(tmp)?;
            Err(Error::from(std::io::Error::other("stage blew up")))
        });

        assert!(result.is_err());
        assert_eq!(std::fs::read(&src).unwrap(), b"original");
        assert!(!appended_ext(&src, "xz").exists());
        assert!(!appended_ext(&src, "xz.tmp").exists());
    }
}
