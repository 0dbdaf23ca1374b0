//! # backupd
//!
//! A backup orchestration engine: define jobs, run them on schedule or on
//! demand, post-process artifacts, enforce retention, and report outcomes.
//!
//! ## Features
//!
//! - **Scheduled Backups**: hourly/daily/weekly/interval recurrence buckets
//! - **Multiple Sources**: database dumps (external utility), file trees,
//!   combined full-system captures, injected custom producers
//! - **Post-Processing**: XZ compression and age encryption with a
//!   passphrase-derived key
//! - **Retention Management**: per-job age-based sweeping of old runs
//! - **Run Tracking**: lifecycle registry with cooperative cancellation and
//!   an append-only SQLite history
//! - **Notifications**: SMTP success/failure reports, silently disabled
//!   when unconfigured
//!
//! ## Quick Start
//!
//! ```no_run
//! use backupd::engine::config::EngineConfig;
//! use backupd::engine::orchestrator::Orchestrator;
//! use backupd::engine::scheduler::Scheduler;
//! use validator::Validate;
//!
//! // Load configuration from YAML file
//! let config: EngineConfig = serde_yml::from_reader(std::fs::File::open("config.yml")?)?;
//! config.validate()?;
//!
//! // Start the backup daemon
//! let orchestrator = Orchestrator::from_config(&config)?;
//! let scheduler = Scheduler::start(orchestrator, *config.poll_interval())?;
//! scheduler.join();
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod engine;
