//! Run instances and their lifecycle states.

use crate::engine::definition::BackupJobDefinition;
use crate::engine::result_error::error::Error;
use chrono::{DateTime, Utc};
use getset::Getters;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

/// Timestamp encoding shared by run ids, run directory names, and artifact
/// file names.
pub static RUN_STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Lifecycle of one run: `Pending → Running → {Completed, Failed}`, with
/// `Cancelled` reachable from any non-terminal state.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, derive_more::Display,
)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    #[display("pending")]
    Pending,
    #[display("running")]
    Running,
    #[display("completed")]
    Completed,
    #[display("failed")]
    Failed,
    #[display("cancelled")]
    Cancelled,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunState::Completed | RunState::Failed | RunState::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Pending => "pending",
            RunState::Running => "running",
            RunState::Completed => "completed",
            RunState::Failed => "failed",
            RunState::Cancelled => "cancelled",
        }
    }
}

impl FromStr for RunState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RunState::Pending),
            "running" => Ok(RunState::Running),
            "completed" => Ok(RunState::Completed),
            "failed" => Ok(RunState::Failed),
            "cancelled" => Ok(RunState::Cancelled),
            other => Err(Error::UnknownRunState(other.to_string())),
        }
    }
}

/// One execution instance of a backup job.
///
/// Holds a snapshot of the definition taken at trigger time; later edits to
/// the registered definition never reach a run already in flight.
#[derive(Clone, Debug, Serialize, Getters)]
#[getset(get = "pub")]
pub struct BackupRun {
    run_id: Arc<str>,
    /// Directory name under the job's namespace, `<stamp>_<seq>`
    dir_name: Arc<str>,
    definition: BackupJobDefinition,
    pub(crate) state: RunState,
    started_at: DateTime<Utc>,
    pub(crate) completed_at: Option<DateTime<Utc>>,
    pub(crate) artifact_path: Option<PathBuf>,
    pub(crate) raw_size: Option<u64>,
    pub(crate) final_size: Option<u64>,
    pub(crate) items_count: Option<u64>,
    pub(crate) error: Option<String>,
}

impl BackupRun {
    /// Creates a `Pending` run. `seq` is a process-wide monotonic counter;
    /// it keeps ids and directory names unique even when two triggers for
    /// the same job land within one second.
    pub fn new(definition: BackupJobDefinition, seq: u64) -> Self {
        let started_at = Utc::now();
        let stamp = started_at.format(RUN_STAMP_FORMAT);
        let dir_name: Arc<str> = format!("{stamp}_{seq}").into();
        let run_id: Arc<str> = format!("{}_{}", definition.name(), dir_name).into();
        Self {
            run_id,
            dir_name,
            definition,
            state: RunState::Pending,
            started_at,
            completed_at: None,
            artifact_path: None,
            raw_size: None,
            final_size: None,
            items_count: None,
            error: None,
        }
    }

    /// Coarse progress indicator: 0 until terminal, then 100.
    pub fn progress(&self) -> u8 {
        if self.state.is_terminal() {
            100
        } else {
            0
        }
    }

    /// Artifact-stamp shared by all files this run produces.
    pub fn stamp(&self) -> String {
        self.started_at.format(RUN_STAMP_FORMAT).to_string()
    }
}
