use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Filesystem step that failed inside a record operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoStep {
    Canonicalize,
    Read,
    CreateDir,
    Write,
    Remove,
}

impl IoStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            IoStep::Canonicalize => "canonicalize",
            IoStep::Read => "read",
            IoStep::CreateDir => "create-dir",
            IoStep::Write => "write",
            IoStep::Remove => "remove",
        }
    }
}

impl fmt::Display for IoStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum ExocortexError {
    #[error("Path escapes record root: {path} is not inside {root}")]
    PathEscape { path: PathBuf, root: PathBuf },
    #[error("Malformed record at {path}: {reason}")]
    MalformedRecord { path: PathBuf, reason: String },
    #[error("I/O failure during {step} of {path}: {source}")]
    IoFailure {
        step: IoStep,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Invalid status: {0}")]
    InvalidStatus(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
}

impl ExocortexError {
    pub fn io(step: IoStep, path: impl Into<PathBuf>, source: io::Error) -> Self {
        ExocortexError::IoFailure {
            step,
            path: path.into(),
            source,
        }
    }

    /// Stable machine-readable name used in reports and audit events.
    pub fn kind(&self) -> &'static str {
        match self {
            ExocortexError::PathEscape { .. } => "path_escape",
            ExocortexError::MalformedRecord { .. } => "malformed_record",
            ExocortexError::IoFailure { .. } => "io_failure",
            ExocortexError::InvalidStatus(_) => "invalid_status",
            ExocortexError::ConfigError(_) => "config_error",
            ExocortexError::ValidationError(_) => "validation_error",
            ExocortexError::NotFound(_) => "not_found",
            ExocortexError::IoError(_) => "io_error",
        }
    }
}
