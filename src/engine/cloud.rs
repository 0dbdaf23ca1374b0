//! Object-storage sync boundary.
//!
//! Cloud replication of finished artifacts is an external capability; the
//! engine only defines the seam and ships a fire-and-log implementation. A
//! real S3/GCS sync plugs in through [`CloudSync`] without touching the
//! orchestrator.

use crate::engine::definition::BackupJobDefinition;
use crate::engine::result_error::result::Result;
use std::path::Path;
use tracing::info;

pub trait CloudSync: Send + Sync {
    fn sync(&self, definition: &BackupJobDefinition, artifact: &Path) -> Result<()>;
}

/// Default implementation: records the request and does nothing.
#[derive(Default)]
pub struct LogOnlyCloudSync;

impl CloudSync for LogOnlyCloudSync {
    fn sync(&self, definition: &BackupJobDefinition, artifact: &Path) -> Result<()> {
        info!(
            "Cloud sync requested for job {:?}, artifact {:?} (no sync target wired)",
            definition.name(),
            artifact
        );
        Ok(())
    }
}
