//! Engine configuration.
//!
//! One YAML document configures the whole daemon: where artifacts live,
//! where history is persisted, the shared dump/encryption/notification
//! settings, and the initially registered job definitions.

use crate::engine::definition::BackupJobDefinition;
use crate::engine::notify::smtp::SmtpNotificationConfig;
use crate::engine::pipeline::compress::XzConfig;
use crate::engine::pipeline::encrypt::EncryptionConfig;
use crate::engine::produce::database::DumpTargetConfig;
use crate::engine::validate::validate_writable_dir;
use bon::Builder;
use getset::Getters;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use validator::Validate;

#[skip_serializing_none]
#[derive(Clone, Debug, Serialize, Deserialize, Validate, Builder, Getters)]
#[serde(deny_unknown_fields)]
#[getset(get = "pub")]
pub struct EngineConfig {
    /// Root under which each job keeps its per-run artifact directories
    #[validate(custom(function = validate_writable_dir))]
    #[builder(into)]
    storage_root: Arc<Path>,
    /// SQLite database holding job definitions and run history
    #[builder(into)]
    history_db: Arc<Path>,
    /// Scheduler tick length
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    #[builder(default = default_poll_interval())]
    poll_interval: Duration,
    /// Connection target for `database`/`full_system` jobs
    #[validate(nested)]
    dump_target: Option<DumpTargetConfig>,
    #[serde(default)]
    #[builder(default)]
    #[validate(nested)]
    compression: XzConfig,
    /// Secret material for jobs with encryption enabled
    #[validate(nested)]
    encryption: Option<EncryptionConfig>,
    /// Notification transport; absent means notifications are a no-op
    #[validate(nested)]
    smtp: Option<SmtpNotificationConfig>,
    /// Definitions registered at startup
    #[serde(default)]
    #[builder(default, into)]
    #[validate(nested)]
    jobs: Vec<BackupJobDefinition>,
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(30)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::definition::JobType;

    #[test]
    fn test_minimal_yaml_config() {
        let yaml = r#"
storage_root: /var/lib/backupd
history_db: /var/lib/backupd/history.db
"#;
        let config: EngineConfig = serde_yml::from_str(yaml).unwrap();
        assert_eq!(config.poll_interval(), &Duration::from_secs(30));
        assert!(config.dump_target().is_none());
        assert!(config.encryption().is_none());
        assert!(config.smtp().is_none());
        assert!(config.jobs().is_empty());
    }

    #[test]
    fn test_full_yaml_config() {
        let yaml = r#"
storage_root: /var/lib/backupd
history_db: /var/lib/backupd/history.db
poll_interval: 1m
dump_target:
  host: db.internal
  port: 5433
  username: backup
  database: orders
  password: not-actually-secret
compression:
  level: 6
encryption:
  passphrase: a long enough passphrase
jobs:
  - name: orders-nightly
    type: database
    recurrence:
      kind: daily
      at: "02:00:00"
  - name: media
    type: files
    recurrence:
      kind: interval
      every: 6h
    include_paths: [/srv/media]
    exclude_patterns: [".cache"]
    encryption_enabled: false
"#;
        let config: EngineConfig = serde_yml::from_str(yaml).unwrap();
        assert_eq!(config.poll_interval(), &Duration::from_secs(60));
        assert_eq!(config.dump_target().as_ref().unwrap().host(), "db.internal");
        assert_eq!(config.jobs().len(), 2);
        assert_eq!(*config.jobs()[0].job_type(), JobType::Database);
        assert!(!config.jobs()[1].encryption_enabled());
    }

    #[test]
    fn test_invalid_job_in_config_fails_validation() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let config = EngineConfig::builder()
            .storage_root(temp_dir.path().to_path_buf())
            .history_db(temp_dir.path().join("history.db"))
            .jobs(vec![BackupJobDefinition::builder()
                .name("bad/name")
                .job_type(JobType::Files)
                .recurrence(crate::engine::definition::Recurrence::Hourly)
                .build()])
            .build();
        assert!(config.validate().is_err());
    }
}
