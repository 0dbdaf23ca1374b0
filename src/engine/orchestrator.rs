//! The orchestrator: façade over producers, pipeline, retention,
//! notifications, history, and the run registry.
//!
//! Owns the run lifecycle state machine. Every run moves
//! `Pending → Running → {Completed, Failed}`, or to `Cancelled` from any
//! non-terminal state when its cancellation flag is observed at a stage
//! boundary. Errors from any stage are caught here and folded into the run
//! record; nothing a single run does can take down the scheduler loop or a
//! sibling run.

use crate::engine::cloud::{CloudSync, LogOnlyCloudSync};
use crate::engine::config::EngineConfig;
use crate::engine::definition::BackupJobDefinition;
use crate::engine::history::sqlite::SqliteStore;
use crate::engine::history::{HistoryRecord, HistoryStore, JobStore};
use crate::engine::notify::NotificationDispatcher;
use crate::engine::pipeline::compress::XzConfig;
use crate::engine::pipeline::encrypt::EncryptionConfig;
use crate::engine::pipeline::post_process;
use crate::engine::produce::database::DumpTargetConfig;
use crate::engine::produce::{produce_artifact, CustomProducer};
use crate::engine::registry::{JobRegistry, RunSlot};
use crate::engine::result_error::error::Error;
use crate::engine::result_error::result::Result;
use crate::engine::retention::sweep_expired;
use crate::engine::run::{BackupRun, RunState};
use chrono::Utc;
use itertools::Itertools;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};
use validator::Validate;

pub struct Orchestrator {
    storage_root: Arc<Path>,
    compression: XzConfig,
    encryption: Option<EncryptionConfig>,
    dump_target: Option<DumpTargetConfig>,
    definitions: Mutex<HashMap<Arc<str>, BackupJobDefinition>>,
    registry: JobRegistry,
    history: Arc<dyn HistoryStore>,
    job_store: Arc<dyn JobStore>,
    dispatcher: NotificationDispatcher,
    cloud: Arc<dyn CloudSync>,
    custom_producers: Mutex<HashMap<Arc<str>, Arc<dyn CustomProducer>>>,
    seq: AtomicU64,
}

impl Orchestrator {
    /// Builds the orchestrator around explicit collaborators. Definitions
    /// already persisted in the job store are loaded first; definitions from
    /// the config are then registered on top (config wins on name clashes).
    pub fn new(
        config: &EngineConfig,
        history: Arc<dyn HistoryStore>,
        job_store: Arc<dyn JobStore>,
        dispatcher: NotificationDispatcher,
        cloud: Arc<dyn CloudSync>,
    ) -> Result<Arc<Self>> {
        let orchestrator = Arc::new(Self {
            storage_root: config.storage_root().clone(),
            compression: config.compression().clone(),
            encryption: config.encryption().clone(),
            dump_target: config.dump_target().clone(),
            definitions: Mutex::new(HashMap::new()),
            registry: JobRegistry::new(),
            history,
            job_store,
            dispatcher,
            cloud,
            custom_producers: Mutex::new(HashMap::new()),
            seq: AtomicU64::new(0),
        });

        for definition in orchestrator.job_store.load_jobs()? {
            orchestrator
                .definitions
                .lock()
                .unwrap()
                .insert(definition.name().clone(), definition);
        }
        for definition in config.jobs() {
            orchestrator.register_job(definition.clone())?;
        }
        Ok(orchestrator)
    }

    /// Convenience wiring: SQLite store, SMTP dispatcher from config,
    /// log-only cloud sync.
    pub fn from_config(config: &EngineConfig) -> Result<Arc<Self>> {
        let store = Arc::new(SqliteStore::open(config.history_db())?);
        let dispatcher = NotificationDispatcher::new(config.smtp().clone());
        Self::new(
            config,
            store.clone(),
            store,
            dispatcher,
            Arc::new(LogOnlyCloudSync),
        )
    }

    /// Creates or wholly replaces a definition. No partial-update merging.
    pub fn register_job(&self, definition: BackupJobDefinition) -> Result<()> {
        definition.validate()?;
        self.job_store.upsert_job(&definition)?;
        info!(
            "Registered backup job {:?} ({})",
            definition.name(),
            definition.job_type()
        );
        self.definitions
            .lock()
            .unwrap()
            .insert(definition.name().clone(), definition);
        Ok(())
    }

    pub fn list_jobs(&self) -> Vec<BackupJobDefinition> {
        self.definitions
            .lock()
            .unwrap()
            .values()
            .cloned()
            .sorted_unstable_by_key(|d| d.name().clone())
            .collect_vec()
    }

    /// Deletes a definition. The scheduler consults the definition table
    /// each tick, so removal also cancels any pending scheduled trigger.
    pub fn remove_job(&self, name: &str) -> Result<bool> {
        let known = self.definitions.lock().unwrap().remove(name).is_some();
        let stored = self.job_store.delete_job(name)?;
        if known || stored {
            info!("Removed backup job {name:?}");
        }
        Ok(known || stored)
    }

    /// Injects the strategy backing a `custom`-type job.
    pub fn register_custom_producer(&self, job_name: &str, producer: Arc<dyn CustomProducer>) {
        self.custom_producers
            .lock()
            .unwrap()
            .insert(job_name.into(), producer);
    }

    /// On-demand trigger, outside any recurrence and regardless of
    /// `enabled`. Subject to the single-active-run-per-name rule.
    pub fn trigger(self: &Arc<Self>, name: &str) -> Result<Arc<str>> {
        let definition = self
            .definitions
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownJob(name.to_string()))?;
        self.spawn_run(definition)
    }

    /// Fire-and-forget dispatch onto a fresh thread. The spawned run owns
    /// its own history persistence and registry cleanup, so it cannot be
    /// lost even if the scheduler loop stops afterwards.
    pub(crate) fn spawn_run(self: &Arc<Self>, definition: BackupJobDefinition) -> Result<Arc<str>> {
        let slot = self.admit(definition)?;
        let run_id = slot.snapshot().run_id().clone();
        let orchestrator = Arc::clone(self);
        let spawned = std::thread::Builder::new()
            .name(format!("run-{run_id}"))
            .spawn(move || {
                orchestrator.execute(slot);
            });
        match spawned {
            Ok(_) => Ok(run_id),
            Err(e) => {
                self.registry.remove(&run_id);
                Err(Error::from(e))
            }
        }
    }

    /// Runs a definition synchronously on the calling thread.
    pub fn run_now(&self, definition: BackupJobDefinition) -> Result<BackupRun> {
        let slot = self.admit(definition)?;
        Ok(self.execute(slot))
    }

    fn admit(&self, definition: BackupJobDefinition) -> Result<Arc<RunSlot>> {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        let slot = self.registry.admit(BackupRun::new(definition, seq))?;
        info!("Run {} admitted as pending", slot.snapshot().run_id());
        Ok(slot)
    }

    pub fn active_runs(&self) -> Vec<BackupRun> {
        self.registry
            .snapshot()
            .into_iter()
            .filter(|run| !run.state().is_terminal())
            .collect_vec()
    }

    pub fn cancel(&self, run_id: &str) -> bool {
        self.registry.request_cancel(run_id)
    }

    pub fn history(&self, limit: usize) -> Result<Vec<HistoryRecord>> {
        self.history.recent(limit)
    }

    /// Drives one admitted run to a terminal state and returns the final
    /// record. Never panics outward and never propagates an error: every
    /// outcome is folded into the run.
    fn execute(&self, slot: Arc<RunSlot>) -> BackupRun {
        let run = slot.snapshot();
        let definition = run.definition().clone();
        let run_dir = self.job_root(&definition).join(run.dir_name().as_ref());

        if slot.cancel_requested() {
            // Cancelled while still pending; no artifact I/O has happened.
            info!("Run {} cancelled before dispatch", run.run_id());
            slot.update(|r| {
                r.state = RunState::Cancelled;
                r.completed_at = Some(Utc::now());
            });
            return self.finish(&slot);
        }

        slot.update(|r| r.state = RunState::Running);
        info!(
            "Run {} started ({} backup of job {:?})",
            run.run_id(),
            definition.job_type(),
            definition.name()
        );

        match self.drive(&slot, &definition, &run_dir) {
            Ok(()) => {
                slot.update(|r| {
                    r.state = RunState::Completed;
                    r.completed_at = Some(Utc::now());
                });
                info!("Run {} completed", run.run_id());
            }
            Err(Error::Cancelled) => {
                slot.update(|r| {
                    r.state = RunState::Cancelled;
                    r.completed_at = Some(Utc::now());
                });
                // Undo the directory when nothing was produced into it;
                // partially written artifacts are left for inspection.
                if slot.snapshot().artifact_path().is_none() {
                    let _ = std::fs::remove_dir_all(&run_dir);
                }
                info!("Run {} cancelled", run.run_id());
            }
            Err(e) => {
                let message = e.to_string();
                error!("Run {} failed: {message}", run.run_id());
                slot.update(|r| {
                    r.state = RunState::Failed;
                    r.completed_at = Some(Utc::now());
                    r.error = Some(message);
                    // A failed run reports no artifact, even when a later
                    // stage was the one that failed; whatever reached disk
                    // stays there for inspection but is not recorded.
                    r.artifact_path = None;
                    r.raw_size = None;
                    r.final_size = None;
                    r.items_count = None;
                });
            }
        }

        self.finish(&slot)
    }

    /// The primary stage sequence. Returns `Err(Cancelled)` when the
    /// cancellation flag is observed at a stage boundary; stages already in
    /// progress are never interrupted.
    fn drive(
        &self,
        slot: &RunSlot,
        definition: &BackupJobDefinition,
        run_dir: &Path,
    ) -> Result<()> {
        std::fs::create_dir_all(run_dir)?;
        checkpoint(slot)?;

        let stamp = slot.snapshot().stamp();
        let custom = self
            .custom_producers
            .lock()
            .unwrap()
            .get(definition.name())
            .cloned();
        let produced = produce_artifact(
            definition,
            run_dir,
            &stamp,
            self.dump_target.as_ref(),
            custom.as_deref(),
        )?;
        slot.update(|r| {
            r.artifact_path = produced.path.clone();
            r.raw_size = Some(produced.raw_size);
            r.items_count = Some(produced.items_count);
        });
        checkpoint(slot)?;

        let processed = post_process(
            produced,
            definition,
            &self.compression,
            self.encryption.as_ref(),
        )?;
        slot.update(|r| {
            r.artifact_path = processed.path.clone();
            r.final_size = processed.final_size;
        });
        checkpoint(slot)?;

        // Anchored at the run's own start instant so the sweep can never
        // consider the directory it is running in expired.
        let started_at = *slot.snapshot().started_at();
        match sweep_expired(
            &self.job_root(definition),
            *definition.retention_days(),
            started_at,
        ) {
            Ok(0) => {}
            Ok(removed) => info!(
                "Retention removed {removed} expired run directories for {:?}",
                definition.name()
            ),
            Err(e) => warn!("{e}"),
        }

        if *definition.cloud_sync_enabled() {
            if let Some(artifact) = &processed.path {
                if let Err(e) = self.cloud.sync(definition, artifact) {
                    warn!("{}", Error::CloudSync(Box::new(e)));
                }
            }
        }

        Ok(())
    }

    /// Notification, history persistence, registry cleanup. Runs for every
    /// terminal state; the run stays visible in the registry until its
    /// history record has at least been attempted.
    fn finish(&self, slot: &RunSlot) -> BackupRun {
        let run = slot.snapshot();

        if *run.definition().notify_on_completion() && *run.state() != RunState::Cancelled {
            if let Err(e) = self.dispatcher.dispatch(&run) {
                warn!("{}", Error::Notification(Box::new(e)));
            }
        }

        if let Err(e) = self.history.record(&HistoryRecord::from(&run)) {
            // The run's terminal state stands; what is lost is the audit
            // record, which deserves an operational alarm.
            error!("{}", Error::HistoryPersist(Box::new(e)));
        }

        self.registry.remove(run.run_id());
        run
    }

    fn job_root(&self, definition: &BackupJobDefinition) -> PathBuf {
        definition
            .destination()
            .as_deref()
            .unwrap_or(self.storage_root.as_ref())
            .join(definition.name().as_ref())
    }
}

fn checkpoint(slot: &RunSlot) -> Result<()> {
    if slot.cancel_requested() {
        Err(Error::Cancelled)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::definition::{JobType, Recurrence};
    use crate::engine::redacted::RedactedString;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    fn config_for(root: &Path, dump_target: Option<DumpTargetConfig>) -> EngineConfig {
        EngineConfig::builder()
            .storage_root(root.to_path_buf())
            .history_db(root.join("history.db"))
            .maybe_dump_target(dump_target)
            .build()
    }

    fn orchestrator_for(
        root: &Path,
        dump_target: Option<DumpTargetConfig>,
    ) -> Arc<Orchestrator> {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        Orchestrator::new(
            &config_for(root, dump_target),
            store.clone(),
            store,
            NotificationDispatcher::new(None),
            Arc::new(LogOnlyCloudSync),
        )
        .unwrap()
    }

    fn files_definition(name: &str, include: PathBuf) -> BackupJobDefinition {
        BackupJobDefinition::builder()
            .name(name)
            .job_type(JobType::Files)
            .recurrence(Recurrence::Hourly)
            .include_paths(vec![include])
            .encryption_enabled(false)
            .build()
    }

    #[test]
    fn test_files_run_completes_end_to_end() {
        let storage = TempDir::new().unwrap();
        let source = TempDir::new().unwrap();
        std::fs::write(source.path().join("a.txt"), "alpha").unwrap();
        std::fs::write(source.path().join("b.txt"), "beta").unwrap();

        let orchestrator = orchestrator_for(storage.path(), None);
        let run = orchestrator
            .run_now(files_definition("docs", source.path().to_path_buf()))
            .unwrap();

        assert_eq!(*run.state(), RunState::Completed);
        assert_eq!(*run.items_count(), Some(2));
        assert!(run.error().is_none());
        let artifact = run.artifact_path().as_ref().unwrap();
        assert!(artifact.is_file());
        assert!(artifact.to_string_lossy().ends_with(".tar.xz"));
        assert!(artifact.starts_with(storage.path().join("docs")));
        assert_eq!(
            *run.final_size(),
            Some(std::fs::metadata(artifact).unwrap().len())
        );

        // Terminal run is out of the registry and in history
        assert!(orchestrator.active_runs().is_empty());
        let history = orchestrator.history(10).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(*history[0].status(), RunState::Completed);
    }

    #[cfg(unix)]
    #[test]
    fn test_failed_dump_records_stderr_and_one_history_record() {
        use std::os::unix::fs::PermissionsExt;

        let storage = TempDir::new().unwrap();
        let stub = storage.path().join("failing_dump.sh");
        std::fs::write(&stub, "#!/bin/sh\necho 'no route to host' >&2\nexit 2\n").unwrap();
        std::fs::set_permissions(&stub, std::fs::Permissions::from_mode(0o755)).unwrap();

        let dump_target = DumpTargetConfig::builder()
            .username("backup")
            .database("orders")
            .password(RedactedString::builder().inner("secret_password").build())
            .dump_utility(stub)
            .build();
        let orchestrator = orchestrator_for(storage.path(), Some(dump_target));

        let definition = BackupJobDefinition::builder()
            .name("orders")
            .job_type(JobType::Database)
            .recurrence(Recurrence::Hourly)
            .build();
        let run = orchestrator.run_now(definition).unwrap();

        assert_eq!(*run.state(), RunState::Failed);
        assert!(run.error().as_ref().unwrap().contains("no route to host"));
        assert!(run.artifact_path().is_none());

        let history = orchestrator.history(10).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(*history[0].status(), RunState::Failed);
        assert!(history[0].error().as_ref().unwrap().contains("no route to host"));
        assert!(history[0].artifact_path().is_none());
    }

    #[test]
    fn test_cancel_pending_run_skips_artifact_io() {
        let storage = TempDir::new().unwrap();
        let orchestrator = orchestrator_for(storage.path(), None);

        let slot = orchestrator
            .admit(files_definition("docs", storage.path().join("unused")))
            .unwrap();
        let run_id = slot.snapshot().run_id().clone();

        assert!(orchestrator.cancel(&run_id));
        let run = orchestrator.execute(slot);

        assert_eq!(*run.state(), RunState::Cancelled);
        assert!(run.artifact_path().is_none());
        assert!(!storage.path().join("docs").exists());

        let history = orchestrator.history(10).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(*history[0].status(), RunState::Cancelled);
    }

    #[test]
    fn test_cancel_after_completion_reports_not_found() {
        let storage = TempDir::new().unwrap();
        let source = TempDir::new().unwrap();
        std::fs::write(source.path().join("a.txt"), "alpha").unwrap();

        let orchestrator = orchestrator_for(storage.path(), None);
        let run = orchestrator
            .run_now(files_definition("docs", source.path().to_path_buf()))
            .unwrap();

        assert_eq!(*run.state(), RunState::Completed);
        assert!(!orchestrator.cancel(run.run_id()));
    }

    #[test]
    fn test_second_trigger_for_same_job_is_rejected() {
        let storage = TempDir::new().unwrap();
        let orchestrator = orchestrator_for(storage.path(), None);

        let _held = orchestrator
            .admit(files_definition("docs", storage.path().join("x")))
            .unwrap();
        let rejected = orchestrator.admit(files_definition("docs", storage.path().join("x")));
        assert!(matches!(rejected, Err(Error::DuplicateActiveRun { .. })));
    }

    #[test]
    fn test_on_demand_trigger_ignores_enabled_flag() {
        let storage = TempDir::new().unwrap();
        let source = TempDir::new().unwrap();
        std::fs::write(source.path().join("a.txt"), "alpha").unwrap();

        let orchestrator = orchestrator_for(storage.path(), None);
        let definition = BackupJobDefinition::builder()
            .name("docs")
            .job_type(JobType::Files)
            .recurrence(Recurrence::Hourly)
            .enabled(false)
            .include_paths(vec![source.path().to_path_buf()])
            .encryption_enabled(false)
            .build();
        orchestrator.register_job(definition).unwrap();

        let run_id = orchestrator.trigger("docs").unwrap();
        assert!(run_id.starts_with("docs_"));

        let deadline = Instant::now() + Duration::from_secs(10);
        while !orchestrator.active_runs().is_empty() {
            assert!(Instant::now() < deadline, "run did not finish in time");
            std::thread::sleep(Duration::from_millis(10));
        }
        let history = orchestrator.history(10).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(*history[0].status(), RunState::Completed);
    }

    #[test]
    fn test_trigger_unknown_job_errors() {
        let storage = TempDir::new().unwrap();
        let orchestrator = orchestrator_for(storage.path(), None);
        assert!(matches!(
            orchestrator.trigger("nope"),
            Err(Error::UnknownJob(_))
        ));
    }

    #[test]
    fn test_history_store_failure_leaves_terminal_state() {
        struct BrokenHistory;
        impl HistoryStore for BrokenHistory {
            fn record(&self, _record: &HistoryRecord) -> Result<()> {
                Err(Error::from(std::io::Error::other("store is down")))
            }
            fn recent(&self, _limit: usize) -> Result<Vec<HistoryRecord>> {
                Ok(Vec::new())
            }
        }

        let storage = TempDir::new().unwrap();
        let source = TempDir::new().unwrap();
        std::fs::write(source.path().join("a.txt"), "alpha").unwrap();

        let jobs = Arc::new(SqliteStore::open_in_memory().unwrap());
        let orchestrator = Orchestrator::new(
            &config_for(storage.path(), None),
            Arc::new(BrokenHistory),
            jobs,
            NotificationDispatcher::new(None),
            Arc::new(LogOnlyCloudSync),
        )
        .unwrap();

        let run = orchestrator
            .run_now(files_definition("docs", source.path().to_path_buf()))
            .unwrap();
        // The lost audit record does not demote the run
        assert_eq!(*run.state(), RunState::Completed);
        assert!(orchestrator.active_runs().is_empty());
    }

    #[test]
    fn test_registered_jobs_survive_in_job_store() {
        let storage = TempDir::new().unwrap();
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let orchestrator = Orchestrator::new(
            &config_for(storage.path(), None),
            store.clone(),
            store.clone(),
            NotificationDispatcher::new(None),
            Arc::new(LogOnlyCloudSync),
        )
        .unwrap();

        orchestrator
            .register_job(files_definition("docs", storage.path().join("src")))
            .unwrap();
        assert_eq!(store.load_jobs().unwrap().len(), 1);

        assert!(orchestrator.remove_job("docs").unwrap());
        assert!(store.load_jobs().unwrap().is_empty());
        assert!(orchestrator.list_jobs().is_empty());
        assert!(!orchestrator.remove_job("docs").unwrap());
    }
}
