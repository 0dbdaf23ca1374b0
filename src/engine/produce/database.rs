//! Database dump producer.
//!
//! Shells out to the external dump utility (`pg_dump` unless an explicit
//! path is configured) and treats the subprocess boundary strictly: success
//! is exit code zero plus a non-empty output file, anything else is fatal to
//! the run with the captured stderr as the error.

use crate::engine::produce::ArtifactSpec;
use crate::engine::redacted::RedactedString;
use crate::engine::result_error::error::Error;
use crate::engine::result_error::result::Result;
use bon::Builder;
use getset::Getters;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::info;
use validator::Validate;

static DEFAULT_DUMP_UTILITY: &str = "pg_dump";

/// Connection target for the external dump utility.
///
/// The password never appears on the command line; it travels to the
/// subprocess through `PGPASSWORD` in its environment.
#[skip_serializing_none]
#[derive(Clone, Debug, Serialize, Deserialize, Validate, Builder, Getters)]
#[serde(deny_unknown_fields)]
#[getset(get = "pub")]
pub struct DumpTargetConfig {
    #[serde(default = "default_host")]
    #[builder(default = default_host(), into)]
    host: String,
    #[serde(default = "default_port")]
    #[builder(default = default_port())]
    port: u16,
    #[builder(into)]
    username: String,
    #[builder(into)]
    database: String,
    #[validate(nested)]
    password: RedactedString,
    /// Explicit utility path; when absent the utility is resolved from PATH
    #[builder(into)]
    dump_utility: Option<PathBuf>,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    5432
}

impl DumpTargetConfig {
    fn resolve_utility(&self) -> Result<PathBuf> {
        match &self.dump_utility {
            Some(path) => Ok(path.clone()),
            None => Ok(which::which(DEFAULT_DUMP_UTILITY)?),
        }
    }
}

/// Runs the dump utility synchronously and returns the single dump artifact.
pub fn dump_database(
    target: &DumpTargetConfig,
    run_dir: &Path,
    stamp: &str,
) -> Result<ArtifactSpec> {
    let utility = target.resolve_utility()?;
    let out_path = run_dir.join(format!("database_{stamp}.sql"));
    info!(
        "Dumping database {:?} on {}:{} to {:?}",
        target.database, target.host, target.port, out_path
    );

    let output = Command::new(&utility)
        .arg("--host")
        .arg(&target.host)
        .arg("--port")
        .arg(target.port.to_string())
        .arg("--username")
        .arg(&target.username)
        .arg("--dbname")
        .arg(&target.database)
        .arg("--file")
        .arg(&out_path)
        .arg("--clean")
        .arg("--if-exists")
        .env("PGPASSWORD", target.password.inner())
        .output()?;

    if !output.status.success() {
        return Err(Error::DumpFailed {
            utility,
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }

    let raw_size = std::fs::metadata(&out_path)?.len();
    if raw_size == 0 {
        return Err(Error::EmptyDump(out_path));
    }

    info!("Database dump finished, {raw_size} bytes");
    Ok(ArtifactSpec {
        path: Some(out_path),
        raw_size,
        items_count: 1,
        final_size: None,
    })
}
