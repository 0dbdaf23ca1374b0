//! In-memory table of in-flight runs.
//!
//! The registry is the only shared view of live runs: the scheduler loop
//! consults it implicitly through admission, status queries copy out of it,
//! and cancellation requests flow into it. Only the orchestrator mutates run
//! state, and only at lifecycle transition points.

use crate::engine::result_error::error::Error;
use crate::engine::result_error::result::Result;
use crate::engine::run::BackupRun;
use itertools::Itertools;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Shared slot for one live run: the run record plus its cooperative
/// cancellation flag. The flag is observed by the owning run at stage
/// boundaries; nothing is forcibly interrupted.
pub struct RunSlot {
    run: Mutex<BackupRun>,
    cancel: AtomicBool,
}

impl RunSlot {
    fn new(run: BackupRun) -> Self {
        Self {
            run: Mutex::new(run),
            cancel: AtomicBool::new(false),
        }
    }

    pub fn snapshot(&self) -> BackupRun {
        self.run.lock().unwrap().clone()
    }

    pub fn cancel_requested(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    pub(crate) fn update<F: FnOnce(&mut BackupRun)>(&self, f: F) {
        f(&mut self.run.lock().unwrap())
    }
}

#[derive(Default)]
pub struct JobRegistry {
    runs: Mutex<HashMap<Arc<str>, Arc<RunSlot>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admits a new run, enforcing at most one non-terminal run per job name.
    /// A conflicting trigger is rejected, never queued.
    pub fn admit(&self, run: BackupRun) -> Result<Arc<RunSlot>> {
        let mut runs = self.runs.lock().unwrap();
        if let Some((existing_id, _)) = runs.iter().find(|(_, slot)| {
            let existing = slot.snapshot();
            existing.definition().name() == run.definition().name()
                && !existing.state().is_terminal()
        }) {
            return Err(Error::DuplicateActiveRun {
                job: run.definition().name().to_string(),
                run_id: existing_id.to_string(),
            });
        }

        let slot = Arc::new(RunSlot::new(run));
        runs.insert(slot.snapshot().run_id().clone(), slot.clone());
        Ok(slot)
    }

    /// Copies of all registered runs, oldest first. Callers never see the
    /// live structure.
    pub fn snapshot(&self) -> Vec<BackupRun> {
        self.runs
            .lock()
            .unwrap()
            .values()
            .map(|slot| slot.snapshot())
            .sorted_unstable_by_key(|run| (*run.started_at(), run.run_id().clone()))
            .collect_vec()
    }

    pub fn get(&self, run_id: &str) -> Option<BackupRun> {
        self.runs
            .lock()
            .unwrap()
            .get(run_id)
            .map(|slot| slot.snapshot())
    }

    /// Requests cooperative cancellation. Returns whether the id was found
    /// and still cancellable (non-terminal).
    pub fn request_cancel(&self, run_id: &str) -> bool {
        let runs = self.runs.lock().unwrap();
        match runs.get(run_id) {
            Some(slot) if !slot.snapshot().state().is_terminal() => {
                slot.cancel.store(true, Ordering::SeqCst);
                true
            }
            _ => false,
        }
    }

    pub(crate) fn remove(&self, run_id: &str) {
        self.runs.lock().unwrap().remove(run_id);
    }
}
