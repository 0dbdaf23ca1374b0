use crate::engine::definition::{BackupJobDefinition, JobType};
use crate::engine::history::{HistoryRecord, HistoryStore, JobStore};
use crate::engine::result_error::result::Result;
use crate::engine::run::RunState;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;

static SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS backup_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id TEXT NOT NULL,
    job_name TEXT NOT NULL,
    status TEXT NOT NULL,
    started_at TEXT NOT NULL,
    completed_at TEXT,
    artifact_path TEXT,
    raw_size INTEGER,
    final_size INTEGER,
    items_count INTEGER,
    duration_seconds REAL,
    error_message TEXT
);
CREATE INDEX IF NOT EXISTS idx_backup_history_started_at
    ON backup_history (started_at);
CREATE TABLE IF NOT EXISTS backup_jobs (
    name TEXT PRIMARY KEY,
    type TEXT NOT NULL,
    definition TEXT NOT NULL
);
";

/// SQLite-backed implementation of both store boundaries. The connection is
/// mutex-guarded; concurrent run threads serialize on it only for the short
/// insert at the end of each run.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl HistoryStore for SqliteStore {
    fn record(&self, record: &HistoryRecord) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO backup_history (run_id, job_name, status, started_at, completed_at, \
             artifact_path, raw_size, final_size, items_count, duration_seconds, error_message) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                record.run_id().as_ref(),
                record.job_name().as_ref(),
                record.status().as_str(),
                record.started_at().to_rfc3339(),
                (*record.completed_at()).map(|dt| dt.to_rfc3339()),
                record
                    .artifact_path()
                    .as_ref()
                    .map(|p| p.display().to_string()),
                (*record.raw_size()).map(|v| v as i64),
                (*record.final_size()).map(|v| v as i64),
                (*record.items_count()).map(|v| v as i64),
                record.duration_seconds(),
                record.error().as_deref(),
            ],
        )?;
        Ok(())
    }

    fn recent(&self, limit: usize) -> Result<Vec<HistoryRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT run_id, job_name, status, started_at, completed_at, artifact_path, \
             raw_size, final_size, items_count, duration_seconds, error_message \
             FROM backup_history ORDER BY started_at DESC, id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map([limit as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, Option<i64>>(6)?,
                row.get::<_, Option<i64>>(7)?,
                row.get::<_, Option<i64>>(8)?,
                row.get::<_, Option<f64>>(9)?,
                row.get::<_, Option<String>>(10)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (
                run_id,
                job_name,
                status,
                started_at,
                completed_at,
                artifact_path,
                raw_size,
                final_size,
                items_count,
                duration_seconds,
                error,
            ) = row?;
            records.push(
                HistoryRecord::builder()
                    .run_id(run_id)
                    .job_name(job_name)
                    .status(RunState::from_str(&status)?)
                    .started_at(parse_stored_datetime(&started_at)?)
                    .maybe_completed_at(
                        completed_at
                            .as_deref()
                            .map(parse_stored_datetime)
                            .transpose()?,
                    )
                    .maybe_artifact_path(artifact_path.map(PathBuf::from))
                    .maybe_raw_size(raw_size.map(|v| v as u64))
                    .maybe_final_size(final_size.map(|v| v as u64))
                    .maybe_items_count(items_count.map(|v| v as u64))
                    .maybe_duration_seconds(duration_seconds)
                    .maybe_error(error)
                    .build(),
            );
        }
        Ok(records)
    }
}

fn parse_stored_datetime(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)?.with_timezone(&Utc))
}

impl JobStore for SqliteStore {
    fn upsert_job(&self, definition: &BackupJobDefinition) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO backup_jobs (name, type, definition) VALUES (?1, ?2, ?3) \
             ON CONFLICT(name) DO UPDATE SET type = excluded.type, definition = excluded.definition",
            params![
                definition.name().as_ref(),
                definition.job_type().as_str(),
                serde_json::to_string(definition)?,
            ],
        )?;
        Ok(())
    }

    fn load_jobs(&self) -> Result<Vec<BackupJobDefinition>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT type, definition FROM backup_jobs ORDER BY name")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut definitions = Vec::new();
        for row in rows {
            let (job_type, definition) = row?;
            // The type column is denormalized for querying; reject rows whose
            // tag no longer names a known producer before parsing the body.
            JobType::from_str(&job_type)?;
            definitions.push(serde_json::from_str(&definition)?);
        }
        Ok(definitions)
    }

    fn delete_job(&self, name: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute("DELETE FROM backup_jobs WHERE name = ?1", params![name])?;
        Ok(deleted > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::definition::{JobType, Recurrence};
    use crate::engine::run::BackupRun;
    use chrono::Duration;

    fn definition(name: &str) -> BackupJobDefinition {
        BackupJobDefinition::builder()
            .name(name)
            .job_type(JobType::Files)
            .recurrence(Recurrence::Hourly)
            .include_paths(vec![PathBuf::from("/var/lib/app")])
            .exclude_patterns(vec!["tmp".to_string()])
            .build()
    }

    fn terminal_record(name: &str, seq: u64, status: RunState) -> HistoryRecord {
        let mut run = BackupRun::new(definition(name), seq);
        run.state = status;
        run.completed_at = Some(*run.started_at() + Duration::seconds(1));
        HistoryRecord::from(&run)
    }

    #[test]
    fn test_record_and_recent_round_trip() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .record(&terminal_record("acct", 1, RunState::Completed))
            .unwrap();
        store
            .record(&terminal_record("acct", 2, RunState::Failed))
            .unwrap();

        let records = store.recent(10).unwrap();
        assert_eq!(records.len(), 2);
        // Newest first; same stored second falls back to insertion order
        assert_eq!(*records[0].status(), RunState::Failed);
        assert_eq!(*records[1].status(), RunState::Completed);
        assert_eq!(records[0].job_name().as_ref(), "acct");
        assert_eq!(*records[0].duration_seconds(), Some(1.0));
    }

    #[test]
    fn test_recent_respects_limit() {
        let store = SqliteStore::open_in_memory().unwrap();
        for seq in 0..5 {
            store
                .record(&terminal_record("acct", seq, RunState::Completed))
                .unwrap();
        }
        assert_eq!(store.recent(3).unwrap().len(), 3);
    }

    #[test]
    fn test_job_upsert_replaces_whole_definition() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.upsert_job(&definition("acct")).unwrap();

        let replacement = BackupJobDefinition::builder()
            .name("acct")
            .job_type(JobType::Database)
            .recurrence(Recurrence::Daily {
                at: chrono::NaiveTime::from_hms_opt(2, 0, 0).unwrap(),
            })
            .compression_enabled(false)
            .build();
        store.upsert_job(&replacement).unwrap();

        let loaded = store.load_jobs().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(*loaded[0].job_type(), JobType::Database);
        assert!(!loaded[0].compression_enabled());
        // Fields absent from the replacement revert to defaults
        assert!(loaded[0].exclude_patterns().is_empty());
    }

    #[test]
    fn test_job_delete() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.upsert_job(&definition("acct")).unwrap();
        assert!(store.delete_job("acct").unwrap());
        assert!(!store.delete_job("acct").unwrap());
        assert!(store.load_jobs().unwrap().is_empty());
    }

    #[test]
    fn test_loaded_definition_round_trips_fields() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.upsert_job(&definition("acct")).unwrap();
        let loaded = &store.load_jobs().unwrap()[0];
        assert_eq!(loaded.name().as_ref(), "acct");
        assert_eq!(loaded.include_paths().as_slice(), &[PathBuf::from("/var/lib/app")]);
        assert_eq!(loaded.exclude_patterns().as_slice(), &["tmp".to_string()]);
    }
}
