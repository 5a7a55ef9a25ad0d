use std::path::PathBuf;

use thiserror::Error;

// ---------------------------------------------------------------------------
// Error taxonomy
// ---------------------------------------------------------------------------

/// Everything that stops a validation command.
///
/// Data mismatches are not errors: they travel as [`crate::diff::DiffReport`]
/// and [`crate::commands::CommandOutcome`] values.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// Malformed options or inputs (bad cadence range, missing mandatory
    /// directory, unset instance id, ...).
    #[error("{0}")]
    Usage(String),

    /// The run could not complete: missing fragments, unexpected state.
    #[error("{0}")]
    Execution(String),

    /// A window was requested outside the range a series covers.
    #[error(
        "cadence window [{target_start}, {target_end}] outside source range \
         [{source_start}, {source_end}]"
    )]
    OutOfBounds {
        target_start: i32,
        target_end: i32,
        source_start: i32,
        source_end: i32,
    },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("can't decode fragment {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Failure while loading an external table (archive, manifest, ...).
    #[error(transparent)]
    Archive(#[from] anyhow::Error),
}

impl ValidationError {
    pub fn usage(message: impl Into<String>) -> Self {
        ValidationError::Usage(message.into())
    }

    pub fn execution(message: impl Into<String>) -> Self {
        ValidationError::Execution(message.into())
    }

    /// Process exit status for this error; usage and execution failures
    /// share status 1.
    pub fn exit_code(&self) -> u8 {
        1
    }

    pub fn is_usage(&self) -> bool {
        matches!(self, ValidationError::Usage(_))
    }
}

pub type Result<T> = std::result::Result<T, ValidationError>;
