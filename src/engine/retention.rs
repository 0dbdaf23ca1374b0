//! Retention sweeping of expired run directories.
//!
//! A job's namespace contains one directory per run, named with the run's
//! timestamp (plus a uniqueness suffix). Anything strictly older than the
//! job's retention window is deleted recursively. The sweep is best-effort:
//! deletion failures are collected and reported, never aborting the rest of
//! the sweep, and the owning run never fails because of them.

use crate::engine::result_error::error::Error;
use crate::engine::result_error::result::{convert_error_vec, Result};
use crate::engine::result_error::WithMsg;
use crate::engine::run::RUN_STAMP_FORMAT;
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use std::path::Path;
use tracing::info;

/// Parses the timestamp out of a run directory name (`<stamp>` or
/// `<stamp>_<seq>`). Names that do not parse belong to something else and
/// are left alone.
pub fn parse_run_dir_stamp(name: &str) -> Option<NaiveDateTime> {
    let stamp = name.get(..15)?;
    let rest = &name[stamp.len()..];
    if !rest.is_empty() && !rest.starts_with('_') {
        return None;
    }
    NaiveDateTime::parse_from_str(stamp, RUN_STAMP_FORMAT).ok()
}

/// Deletes run directories under `job_root` older than `retention_days`.
/// Returns the number removed, or the collected failures.
pub fn sweep_expired(job_root: &Path, retention_days: u32, now: DateTime<Utc>) -> Result<usize> {
    if !job_root.is_dir() {
        return Ok(0);
    }

    let cutoff = now - Duration::days(retention_days as i64);
    let mut removed = 0;
    let mut failures = Vec::new();

    for entry in std::fs::read_dir(job_root)? {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                failures.push(Error::from(e));
                continue;
            }
        };
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let stamp = entry
            .file_name()
            .to_str()
            .and_then(parse_run_dir_stamp)
            .map(|naive| naive.and_utc());
        let Some(stamp) = stamp else {
            continue;
        };
        if stamp < cutoff {
            info!("Removing expired run directory {:?}", path);
            match std::fs::remove_dir_all(&path) {
                Ok(()) => removed += 1,
                Err(e) => failures.push(
                    Error::from(e).with_msg(format!("Removing expired directory {path:?} failed")),
                ),
            }
        }
    }

    convert_error_vec(failures)
        .map(|_| removed)
        .map_err(|e| Error::RetentionSweep(Box::new(e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn run_dir_name(now: DateTime<Utc>, days_ago: i64, seq: u64) -> String {
        format!(
            "{}_{}",
            (now - Duration::days(days_ago)).format(RUN_STAMP_FORMAT),
            seq
        )
    }

    #[test]
    fn test_parse_run_dir_stamp() {
        assert!(parse_run_dir_stamp("20260301_020000").is_some());
        assert!(parse_run_dir_stamp("20260301_020000_7").is_some());
        assert!(parse_run_dir_stamp("20260301_020000junk").is_none());
        assert!(parse_run_dir_stamp("notadate").is_none());
        assert!(parse_run_dir_stamp("").is_none());
    }

    #[test]
    fn test_sweep_deletes_only_directories_past_cutoff() {
        let temp_dir = TempDir::new().unwrap();
        let now = Utc::now();
        let old = temp_dir.path().join(run_dir_name(now, 10, 1));
        let recent = temp_dir.path().join(run_dir_name(now, 3, 2));
        std::fs::create_dir_all(old.join("inner")).unwrap();
        std::fs::write(old.join("inner/artifact.tar"), b"x").unwrap();
        std::fs::create_dir(&recent).unwrap();

        let removed = sweep_expired(temp_dir.path(), 7, now).unwrap();
        assert_eq!(removed, 1);
        assert!(!old.exists());
        assert!(recent.exists());
    }

    #[test]
    fn test_sweep_ignores_unparseable_names_and_plain_files() {
        let temp_dir = TempDir::new().unwrap();
        let now = Utc::now();
        let keeper = temp_dir.path().join("README");
        std::fs::create_dir(&keeper).unwrap();
        std::fs::write(temp_dir.path().join("stray.txt"), b"x").unwrap();

        let removed = sweep_expired(temp_dir.path(), 0, now).unwrap();
        assert_eq!(removed, 0);
        assert!(keeper.exists());
    }

    #[test]
    fn test_sweep_of_missing_root_is_a_noop() {
        let temp_dir = TempDir::new().unwrap();
        let removed = sweep_expired(&temp_dir.path().join("never-ran"), 7, Utc::now()).unwrap();
        assert_eq!(removed, 0);
    }

    #[test]
    fn test_zero_retention_deletes_everything_dated_before_now() {
        let temp_dir = TempDir::new().unwrap();
        let now = Utc::now();
        let yesterday = temp_dir.path().join(run_dir_name(now, 1, 1));
        std::fs::create_dir(&yesterday).unwrap();

        let removed = sweep_expired(temp_dir.path(), 0, now).unwrap();
        assert_eq!(removed, 1);
        assert!(!yesterday.exists());
    }
}
