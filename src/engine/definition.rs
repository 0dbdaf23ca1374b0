//! Backup job definitions.
//!
//! A `BackupJobDefinition` describes one named backup job: what to capture,
//! how often, how long to keep it, and which post-processing and reporting
//! options apply. Definitions are registered through the orchestrator and
//! snapshotted into each run at trigger time, so editing a definition never
//! affects a run that is already in flight.

use crate::engine::result_error::error::Error;
use crate::engine::validate::validate_job_name;
use bon::Builder;
use chrono::{DateTime, Datelike, Duration, NaiveTime, Timelike, Utc, Weekday};
use getset::Getters;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use validator::Validate;

/// What a job backs up.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, derive_more::Display,
)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// Dump of the configured relational database via the external dump utility
    #[display("database")]
    Database,
    /// Tar archive of the definition's `include_paths`
    #[display("files")]
    Files,
    /// Database dump folded into the file archive, sequentially
    #[display("full_system")]
    FullSystem,
    /// Caller-injected producer strategy; a no-op when none is registered
    #[display("custom")]
    Custom,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Database => "database",
            JobType::Files => "files",
            JobType::FullSystem => "full_system",
            JobType::Custom => "custom",
        }
    }
}

impl FromStr for JobType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "database" => Ok(JobType::Database),
            "files" => Ok(JobType::Files),
            "full_system" => Ok(JobType::FullSystem),
            "custom" => Ok(JobType::Custom),
            other => Err(Error::UnknownJobType(other.to_string())),
        }
    }
}

/// Fixed recurrence buckets evaluated by the scheduler loop.
///
/// Each variant defines a boundary series; a job is due when the most recent
/// boundary at or before `now` is later than the last firing. Missed
/// boundaries are never backfilled.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
#[serde(rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
pub enum Recurrence {
    /// Once per wall-clock hour boundary
    Hourly,
    /// Once per day at a fixed time (02:00 unless configured)
    Daily {
        #[serde(default = "default_fire_time")]
        at: NaiveTime,
    },
    /// Once per week at a fixed weekday and time
    Weekly {
        #[serde(default = "default_fire_weekday")]
        on: Weekday,
        #[serde(default = "default_fire_time")]
        at: NaiveTime,
    },
    /// Fallback bucket: a fixed interval between firings
    Interval {
        #[serde(with = "humantime_serde")]
        every: std::time::Duration,
    },
}

fn default_fire_time() -> NaiveTime {
    NaiveTime::from_hms_opt(2, 0, 0).unwrap()
}

fn default_fire_weekday() -> Weekday {
    Weekday::Mon
}

impl Recurrence {
    /// Most recent boundary at or before `now`, except for `Interval` which
    /// has no absolute boundary series.
    fn last_boundary(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Recurrence::Hourly => Some(
                now.date_naive()
                    .and_hms_opt(now.hour(), 0, 0)
                    .unwrap()
                    .and_utc(),
            ),
            Recurrence::Daily { at } => {
                let mut boundary = now.date_naive().and_time(*at).and_utc();
                if boundary > now {
                    boundary -= Duration::days(1);
                }
                Some(boundary)
            }
            Recurrence::Weekly { on, at } => {
                let days_back = (now.weekday().num_days_from_monday() as i64 + 7
                    - on.num_days_from_monday() as i64)
                    % 7;
                let mut boundary = (now.date_naive() - Duration::days(days_back))
                    .and_time(*at)
                    .and_utc();
                if boundary > now {
                    boundary -= Duration::days(7);
                }
                Some(boundary)
            }
            Recurrence::Interval { .. } => None,
        }
    }

    pub fn is_due(&self, last_fired: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match self {
            Recurrence::Interval { every } => {
                let every = Duration::from_std(*every).unwrap_or(Duration::MAX);
                now.signed_duration_since(last_fired) >= every
            }
            _ => match self.last_boundary(now) {
                Some(boundary) => last_fired < boundary,
                None => false,
            },
        }
    }
}

/// One named backup job.
#[skip_serializing_none]
#[derive(Clone, Debug, Serialize, Deserialize, Validate, Builder, Getters)]
#[serde(deny_unknown_fields)]
#[getset(get = "pub")]
pub struct BackupJobDefinition {
    /// Globally unique name; also the artifact namespace on disk
    #[validate(custom(function = validate_job_name))]
    #[builder(into)]
    name: Arc<str>,
    #[serde(rename = "type")]
    job_type: JobType,
    recurrence: Recurrence,
    #[serde(default = "default_true")]
    #[builder(default = true)]
    enabled: bool,
    /// Age in days beyond which past run directories are deleted
    #[serde(default = "default_retention_days")]
    #[builder(default = default_retention_days())]
    retention_days: u32,
    #[serde(default = "default_true")]
    #[builder(default = true)]
    compression_enabled: bool,
    #[serde(default = "default_true")]
    #[builder(default = true)]
    encryption_enabled: bool,
    /// Filesystem roots walked by the `files` and `full_system` types
    #[serde(default)]
    #[builder(default, into)]
    include_paths: Arc<Vec<PathBuf>>,
    /// Substrings excluding any file whose full path contains one of them
    #[serde(default)]
    #[builder(default, into)]
    exclude_patterns: Arc<Vec<String>>,
    /// Optional per-job override of the engine's storage root
    #[builder(into)]
    destination: Option<Arc<Path>>,
    #[serde(default = "default_true")]
    #[builder(default = true)]
    notify_on_completion: bool,
    #[serde(default)]
    #[builder(default)]
    cloud_sync_enabled: bool,
}

fn default_true() -> bool {
    true
}

fn default_retention_days() -> u32 {
    7
}
