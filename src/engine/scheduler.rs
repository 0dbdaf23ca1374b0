//! The single background timing loop.
//!
//! Polls the registered definitions at a fixed interval and fires due ones
//! through the orchestrator, fire-and-forget: the loop never waits on a
//! run. Each definition is baselined when first seen, so a freshly
//! registered job fires at its next boundary rather than immediately, and
//! ticks missed while the process was down are never backfilled.

use crate::engine::definition::BackupJobDefinition;
use crate::engine::orchestrator::Orchestrator;
use crate::engine::result_error::result::Result;
use chrono::{DateTime, Utc};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{info, warn};

pub struct Scheduler {
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Scheduler {
    /// Spawns the timing loop thread.
    pub fn start(orchestrator: Arc<Orchestrator>, poll_interval: Duration) -> Result<Scheduler> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let loop_shutdown = shutdown.clone();
        let handle = std::thread::Builder::new()
            .name("scheduler".to_string())
            .spawn(move || run_loop(orchestrator, poll_interval, loop_shutdown))?;
        Ok(Scheduler {
            shutdown,
            handle: Some(handle),
        })
    }

    /// Stops the loop and waits for it to exit. In-flight runs are not
    /// touched; each run thread owns its own cleanup.
    pub fn stop(mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }

    /// Blocks on the loop thread (it only exits after `stop`).
    pub fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run_loop(orchestrator: Arc<Orchestrator>, poll_interval: Duration, shutdown: Arc<AtomicBool>) {
    info!("Scheduler loop started, polling every {:?}", poll_interval);
    let mut last_fired: HashMap<Arc<str>, DateTime<Utc>> = HashMap::new();

    while !shutdown.load(Ordering::SeqCst) {
        let definitions = orchestrator.list_jobs();
        for definition in due_definitions(&definitions, &mut last_fired, Utc::now()) {
            match orchestrator.spawn_run(definition.clone()) {
                Ok(run_id) => info!(
                    "Scheduled run {run_id} for job {:?}",
                    definition.name()
                ),
                // Typically a still-active previous run; the tick is spent
                // either way, the next boundary will try again.
                Err(e) => warn!("Skipping scheduled run for {:?}: {e}", definition.name()),
            }
        }
        std::thread::sleep(poll_interval);
    }
    info!("Scheduler loop stopped");
}

/// Pure tick evaluation. Definitions seen for the first time are baselined
/// at `now` without firing; known ones fire when their recurrence says the
/// time since the recorded firing crossed a boundary. State for definitions
/// that disappeared (removed or disabled) is dropped, which is what cancels
/// their pending scheduled triggers.
pub(crate) fn due_definitions(
    definitions: &[BackupJobDefinition],
    last_fired: &mut HashMap<Arc<str>, DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Vec<BackupJobDefinition> {
    let mut due = Vec::new();
    for definition in definitions.iter().filter(|d| *d.enabled()) {
        match last_fired.entry(definition.name().clone()) {
            Entry::Vacant(entry) => {
                entry.insert(now);
            }
            Entry::Occupied(mut entry) => {
                if definition.recurrence().is_due(*entry.get(), now) {
                    entry.insert(now);
                    due.push(definition.clone());
                }
            }
        }
    }
    last_fired.retain(|name, _| {
        definitions
            .iter()
            .any(|d| d.name() == name && *d.enabled())
    });
    due
}
