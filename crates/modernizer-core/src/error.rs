//! Error and warning types for the archive modernizer.
//!
//! Fatal conditions are `ModernizerError` variants and propagate with `?`.
//! Non-fatal findings (skipped subtrees, ambiguous pattern matches, planning
//! collisions) are `Warning` values collected in the run context and surfaced
//! in the validation report.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the modernizer engine.
#[derive(Debug, Error)]
pub enum ModernizerError {
    // Catalog errors
    #[error("Access error at {path}: {message}")]
    Access {
        path: PathBuf,
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    // Planning errors
    #[error("Unresolvable rule set: {message}")]
    UnresolvableRule { message: String },

    // Execution errors
    #[error("Copy verification failed for {destination}: {message}")]
    CopyVerification { destination: PathBuf, message: String },

    #[error("Copy of {path} timed out after {timeout:?}")]
    Timeout {
        path: PathBuf,
        timeout: std::time::Duration,
    },

    #[error("Target root {0} is not empty; confirm reuse to migrate into it")]
    TargetNotEmpty(PathBuf),

    #[error("Target root {path} is locked by another run")]
    TargetLocked { path: PathBuf },

    #[error("Invalid executor state: expected {expected}, found {actual}")]
    InvalidState { expected: String, actual: String },

    #[error("Operation was cancelled")]
    Cancelled,

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("{0}")]
    Other(String),
}

/// Result type alias for modernizer operations.
pub type Result<T> = std::result::Result<T, ModernizerError>;

impl From<std::io::Error> for ModernizerError {
    fn from(err: std::io::Error) -> Self {
        ModernizerError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for ModernizerError {
    fn from(err: serde_json::Error) -> Self {
        ModernizerError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl ModernizerError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        ModernizerError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Create an access error for an unreadable path.
    pub fn access(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        ModernizerError::Access {
            path: path.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Create a rule error.
    pub fn rule(message: impl Into<String>) -> Self {
        ModernizerError::UnresolvableRule {
            message: message.into(),
        }
    }

    /// Whether this error, raised by a single plan entry, must halt the run
    /// and trigger rollback.
    pub fn is_fatal_to_run(&self) -> bool {
        !matches!(self, ModernizerError::Access { .. })
    }

    /// Whether this error was raised before any filesystem mutation could
    /// have happened.
    pub fn is_analysis_error(&self) -> bool {
        matches!(
            self,
            ModernizerError::Access { .. }
                | ModernizerError::UnresolvableRule { .. }
                | ModernizerError::TargetNotEmpty(_)
                | ModernizerError::TargetLocked { .. }
        )
    }
}

/// Non-fatal findings collected across pipeline stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    /// A subtree could not be read and was skipped by the catalog.
    AccessSkipped { path: PathBuf, message: String },
    /// A file matched several patterns with the same confidence.
    PatternAmbiguity {
        path: PathBuf,
        candidates: Vec<String>,
        chosen: String,
    },
    /// Two plan entries wanted the same target path.
    PlanningCollision {
        source: PathBuf,
        wanted: PathBuf,
        assigned: PathBuf,
    },
    /// A revision group could not be ordered without a cycle.
    RevisionInconsistency { files: Vec<PathBuf>, message: String },
    /// Rollback could not undo an operation.
    RollbackIncomplete { path: PathBuf, message: String },
    /// A source file scheduled for removal was kept.
    SourceRetained { path: PathBuf, message: String },
}

impl Warning {
    /// Short machine-friendly category name.
    pub fn kind(&self) -> &'static str {
        match self {
            Warning::AccessSkipped { .. } => "access_skipped",
            Warning::PatternAmbiguity { .. } => "pattern_ambiguity",
            Warning::PlanningCollision { .. } => "planning_collision",
            Warning::RevisionInconsistency { .. } => "revision_inconsistency",
            Warning::RollbackIncomplete { .. } => "rollback_incomplete",
            Warning::SourceRetained { .. } => "source_retained",
        }
    }
}

impl std::fmt::Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Warning::AccessSkipped { path, message } => {
                write!(f, "skipped unreadable {}: {}", path.display(), message)
            }
            Warning::PatternAmbiguity {
                path,
                candidates,
                chosen,
            } => write!(
                f,
                "{} matches {} equally ({}), chose {}",
                path.display(),
                candidates.len(),
                candidates.join(", "),
                chosen
            ),
            Warning::PlanningCollision {
                source,
                wanted,
                assigned,
            } => write!(
                f,
                "{} collided on {}, assigned {}",
                source.display(),
                wanted.display(),
                assigned.display()
            ),
            Warning::RevisionInconsistency { files, message } => {
                write!(f, "revision inconsistency across {} files: {}", files.len(), message)
            }
            Warning::RollbackIncomplete { path, message } => {
                write!(f, "rollback left {} in place: {}", path.display(), message)
            }
            Warning::SourceRetained { path, message } => {
                write!(f, "source {} was kept: {}", path.display(), message)
            }
        }
    }
}
