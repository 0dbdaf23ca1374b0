use crate::engine::result_error::{WithDebugObjectAndFnName, WithFnName, WithMsg};
use itertools::Itertools;
use std::fmt::Debug;
use std::path::PathBuf;
use std::process::ExitStatus;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Rusqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    WalkDir(#[from] walkdir::Error),
    #[error(transparent)]
    AgeEncrypt(#[from] age::EncryptError),
    #[error(transparent)]
    ValidationError(#[from] validator::ValidationErrors),
    #[error(transparent)]
    SerdeYml(#[from] serde_yml::Error),
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
    #[error(transparent)]
    Lettre(#[from] lettre::error::Error),
    #[error(transparent)]
    Smtp(#[from] lettre::transport::smtp::Error),
    #[error(transparent)]
    Which(#[from] which::Error),
    #[error(transparent)]
    ChronoParse(#[from] chrono::ParseError),
    #[error("unknown job type {0:?}")]
    UnknownJobType(String),
    #[error("unknown run state {0:?}")]
    UnknownRunState(String),
    #[error("no backup job named {0:?}")]
    UnknownJob(String),
    #[error("job {job:?} already has an active run {run_id}")]
    DuplicateActiveRun { job: String, run_id: String },
    #[error("{utility:?} exited with {status}: {stderr}")]
    DumpFailed {
        utility: PathBuf,
        status: ExitStatus,
        stderr: String,
    },
    #[error("dump utility produced an empty file at {0:?}")]
    EmptyDump(PathBuf),
    #[error("database dump requested but no dump target is configured")]
    MissingDumpTarget,
    #[error("encryption requested but no encryption secret is configured")]
    MissingEncryptionSecret,
    #[error("smtp server rejected the message: {0}")]
    SmtpRejected(String),
    #[error("run cancelled")]
    Cancelled,
    #[error("artifact production failed:\n{}", indent::indent_all_with("  ", .0.to_string()))]
    ArtifactProduction(Box<Error>),
    #[error("{stage} stage failed:\n{}", indent::indent_all_with("  ", error.to_string()))]
    PipelineStage {
        stage: &'static str,
        error: Box<Error>,
    },
    #[error("retention sweep incomplete:\n{}", indent::indent_all_with("  ", .0.to_string()))]
    RetentionSweep(Box<Error>),
    #[error("notification delivery failed:\n{}", indent::indent_all_with("  ", .0.to_string()))]
    Notification(Box<Error>),
    #[error("cloud sync failed:\n{}", indent::indent_all_with("  ", .0.to_string()))]
    CloudSync(Box<Error>),
    #[error("history record lost:\n{}", indent::indent_all_with("  ", .0.to_string()))]
    HistoryPersist(Box<Error>),
    #[error("{}:\n{}", msg, indent::indent_all_with("  ", error.to_string()))]
    WithMsg { msg: String, error: Box<Error> },
    #[error("{} failed:\n{}", fn_name, indent::indent_all_with("  ", error.to_string()))]
    WithFnName { fn_name: String, error: Box<Error> },
    #[error("{}", itertools::join(.0, "\n\n"))]
    LotsOfError(Vec<Error>),
}

impl<S: Into<String>, O: Debug + Send + 'static> WithDebugObjectAndFnName<S, O> for Error {
    fn with_debug_object_and_fn_name(self, obj: O, fn_name: S) -> Self {
        Error::WithMsg {
            msg: format!("{:?} {} failed", obj, fn_name.into()),
            error: Box::new(self),
        }
    }
}

impl<S: Into<String>> WithMsg<S> for Error {
    fn with_msg(self, msg: S) -> Self {
        Self::WithMsg {
            msg: msg.into(),
            error: Box::new(self),
        }
    }
}

impl<S: Into<String>> WithFnName<S> for Error {
    fn with_fn_name(self, fn_name: S) -> Self {
        Self::WithFnName {
            fn_name: fn_name.into(),
            error: Box::new(self),
        }
    }
}

impl From<Vec<Error>> for Error {
    fn from(errors: Vec<Error>) -> Self {
        if errors.is_empty() {
            panic!("Should not aggregate an empty error list")
        }
        Self::LotsOfError(errors.into_iter().flat_map(|e| e.into_iter()).collect_vec())
    }
}

impl Error {
    pub fn into_iter(self) -> Box<dyn Iterator<Item = Error>> {
        match self {
            Error::LotsOfError(v) => Box::new(v.into_iter().flat_map(|e| e.into_iter())),
            e => Box::new(std::iter::once(e)),
        }
    }

    pub fn chain(self, other: Error) -> Error {
        Error::LotsOfError(self.into_iter().chain(other.into_iter()).collect_vec())
    }
}
