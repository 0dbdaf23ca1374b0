//! Artifact producers, one per job type.
//!
//! Every producer either fails or yields an [`ArtifactSpec`] describing the
//! single raw artifact it wrote into the run directory. The `custom` type is
//! an injection point: with no [`CustomProducer`] registered for the job it
//! succeeds as a no-op with zero items.

pub mod database;
pub mod files;

use crate::engine::definition::{BackupJobDefinition, JobType};
use crate::engine::produce::database::DumpTargetConfig;
use crate::engine::result_error::error::Error;
use crate::engine::result_error::result::Result;
use crate::engine::result_error::WithMsg;
use std::path::{Path, PathBuf};

/// Output contract of every producer.
#[derive(Debug, Clone, Default)]
pub struct ArtifactSpec {
    /// The raw artifact file; `None` only for the no-op custom producer
    pub path: Option<PathBuf>,
    /// Size in bytes of the raw artifact before post-processing
    pub raw_size: u64,
    /// Number of logical items captured (files, dumps, strategy-defined)
    pub items_count: u64,
    /// Size after the last post-processing stage, filled by the pipeline
    pub final_size: Option<u64>,
}

/// Caller-supplied strategy backing the `custom` job type.
pub trait CustomProducer: Send + Sync {
    fn produce(&self, definition: &BackupJobDefinition, run_dir: &Path) -> Result<ArtifactSpec>;
}

/// Dispatches to the producer matching the definition's job type. Any
/// failure is wrapped so the orchestrator can attribute it to artifact
/// production.
pub fn produce_artifact(
    definition: &BackupJobDefinition,
    run_dir: &Path,
    stamp: &str,
    dump_target: Option<&DumpTargetConfig>,
    custom: Option<&dyn CustomProducer>,
) -> Result<ArtifactSpec> {
    match definition.job_type() {
        JobType::Database => {
            let target = dump_target.ok_or(Error::MissingDumpTarget)?;
            database::dump_database(target, run_dir, stamp)
        }
        JobType::Files => files::archive_files(definition, run_dir, stamp, None),
        JobType::FullSystem => {
            // Sequential on purpose: a dump failure is attributed before any
            // file walking starts.
            let target = dump_target.ok_or(Error::MissingDumpTarget)?;
            let dump = database::dump_database(target, run_dir, stamp)
                .with_msg("Database half of full_system backup failed")?;
            let dump_path = dump.path.as_deref();
            files::archive_files(definition, run_dir, stamp, dump_path)
                .with_msg("Files half of full_system backup failed")
        }
        JobType::Custom => match custom {
            Some(producer) => producer.produce(definition, run_dir),
            None => {
                tracing::info!(
                    "No custom producer registered for job {:?}, nothing to do",
                    definition.name()
                );
                Ok(ArtifactSpec::default())
            }
        },
    }
    .map_err(|e| Error::ArtifactProduction(Box::new(e)))
}
