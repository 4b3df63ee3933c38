use std::error::Error as StdError;
use std::path::PathBuf;
use thiserror::Error;

/// Why a template and submission could not be merged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssemblyError {
    /// The submission is the user's fault: zero or several solution units.
    #[error("submission rejected: {0}")]
    Extraction(String),

    /// The problem definition is broken; operators need to fix the template.
    #[error("malformed problem template: {0}")]
    Template(String),
}

/// The isolation backend could not be used at all.
#[derive(Debug, Error)]
#[error("sandbox unavailable: {message}")]
pub struct SandboxFault {
    pub message: String,
    #[source]
    pub source: Option<Box<dyn StdError + Send + Sync>>,
}

impl SandboxFault {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(message: impl Into<String>, source: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        Self {
            message: message.into(),
            source: Some(source.into()),
        }
    }
}

/// Errors that make grading impossible. Assembly problems are not among
/// them; they come back as a `GradeSummary` with an Error status.
#[derive(Debug, Error)]
pub enum GradeError {
    #[error(transparent)]
    Sandbox(#[from] SandboxFault),

    #[error("workspace error at {path}: {source}")]
    Workspace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("grading cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, GradeError>;
