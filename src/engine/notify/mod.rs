//! Outcome notifications.
//!
//! The dispatcher formats a terminal run into a subject and body and hands
//! it to the configured transport. With no transport configured it degrades
//! to a silent no-op on purpose: an unconfigured mail relay must never turn
//! a healthy backup into a failure. Delivery errors are the caller's to log;
//! they are never fatal to the run.

pub mod smtp;

use crate::engine::notify::smtp::SmtpNotificationConfig;
use crate::engine::result_error::result::Result;
use crate::engine::run::{BackupRun, RunState};
use std::fmt::Display;
use tracing::debug;

pub trait Notification {
    fn send<D1: Display, D2: Display>(&self, topic: D1, msg: D2) -> Result<()>;
}

pub struct NotificationDispatcher {
    transport: Option<SmtpNotificationConfig>,
}

impl NotificationDispatcher {
    pub fn new(transport: Option<SmtpNotificationConfig>) -> Self {
        Self { transport }
    }

    /// Sends the outcome message for a terminal run.
    pub fn dispatch(&self, run: &BackupRun) -> Result<()> {
        let Some(transport) = &self.transport else {
            debug!("No notification transport configured, skipping");
            return Ok(());
        };
        let (subject, body) = outcome_message(run);
        transport.send(subject, body)
    }
}

fn outcome_message(run: &BackupRun) -> (String, String) {
    let definition = run.definition();
    let when = (*run.completed_at()).unwrap_or(*run.started_at());
    match run.state() {
        RunState::Completed => {
            let size_mb = (*run.final_size())
                .or(*run.raw_size())
                .map(|bytes| bytes as f64 / 1024.0 / 1024.0)
                .unwrap_or(0.0);
            (
                format!("Backup succeeded: {}", definition.name()),
                format!(
                    "Backup completed successfully:\n\n\
                     Job: {}\n\
                     Type: {}\n\
                     Date: {}\n\
                     Artifact: {}\n\
                     Size: {:.2} MB\n\
                     Items: {}\n",
                    definition.name(),
                    definition.job_type(),
                    when.format("%Y-%m-%d %H:%M:%S"),
                    run.artifact_path()
                        .as_ref()
                        .map(|p| p.display().to_string())
                        .unwrap_or_else(|| "N/A".to_string()),
                    size_mb,
                    (*run.items_count()).unwrap_or(0),
                ),
            )
        }
        _ => (
            format!("Backup failed: {}", definition.name()),
            format!(
                "Backup failed:\n\n\
                 Job: {}\n\
                 Type: {}\n\
                 Date: {}\n\
                 Error: {}\n",
                definition.name(),
                definition.job_type(),
                when.format("%Y-%m-%d %H:%M:%S"),
                run.error().as_deref().unwrap_or("unknown error"),
            ),
        ),
    }
}
