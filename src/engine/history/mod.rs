//! Durable run history.
//!
//! Every run, whatever its terminal state, becomes exactly one immutable
//! `HistoryRecord` in the store. The store itself is an external collaborator
//! behind the `HistoryStore`/`JobStore` traits; the shipped implementation is
//! SQLite ([`sqlite::SqliteStore`]).

pub mod sqlite;

use crate::engine::definition::BackupJobDefinition;
use crate::engine::result_error::result::Result;
use crate::engine::run::{BackupRun, RunState};
use bon::Builder;
use chrono::{DateTime, Utc};
use getset::Getters;
use serde::Serialize;
use serde_with::skip_serializing_none;
use std::path::PathBuf;
use std::sync::Arc;

/// Immutable append-only projection of a terminal run.
#[skip_serializing_none]
#[derive(Clone, Debug, Serialize, Builder, Getters)]
#[getset(get = "pub")]
pub struct HistoryRecord {
    #[builder(into)]
    run_id: Arc<str>,
    #[builder(into)]
    job_name: Arc<str>,
    status: RunState,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    #[builder(into)]
    artifact_path: Option<PathBuf>,
    raw_size: Option<u64>,
    final_size: Option<u64>,
    items_count: Option<u64>,
    duration_seconds: Option<f64>,
    #[builder(into)]
    error: Option<String>,
}

impl From<&BackupRun> for HistoryRecord {
    fn from(run: &BackupRun) -> Self {
        let duration_seconds = (*run.completed_at())
            .map(|done| done.signed_duration_since(*run.started_at()))
            .map(|d| d.num_milliseconds() as f64 / 1000.0);
        Self {
            run_id: run.run_id().clone(),
            job_name: run.definition().name().clone(),
            status: *run.state(),
            started_at: *run.started_at(),
            completed_at: *run.completed_at(),
            artifact_path: run.artifact_path().clone(),
            raw_size: *run.raw_size(),
            final_size: *run.final_size(),
            items_count: *run.items_count(),
            duration_seconds,
            error: run.error().clone(),
        }
    }
}

/// Append-only history boundary.
pub trait HistoryStore: Send + Sync {
    fn record(&self, record: &HistoryRecord) -> Result<()>;
    /// Terminal records, newest first, at most `limit`.
    fn recent(&self, limit: usize) -> Result<Vec<HistoryRecord>>;
}

/// Definition persistence boundary. An upsert replaces the whole stored
/// definition; there is no partial-update merging.
pub trait JobStore: Send + Sync {
    fn upsert_job(&self, definition: &BackupJobDefinition) -> Result<()>;
    fn load_jobs(&self) -> Result<Vec<BackupJobDefinition>>;
    fn delete_job(&self, name: &str) -> Result<bool>;
}
