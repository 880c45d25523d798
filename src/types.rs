use std::num::ParseIntError;
use std::path::PathBuf;

use thiserror::Error;

/// Reasons a raw line cannot become a [`Record`](crate::record::Record).
#[derive(Debug, Error)]
pub enum ValidationError {
    /// The line did not split into the expected number of comma fields.
    #[error("expected {expected} fields, found {found}")]
    FieldCount { expected: usize, found: usize },

    /// The `id` field is not an integer.
    #[error("invalid id {value:?}")]
    InvalidId {
        value: String,
        #[source]
        source: ParseIntError,
    },
}

/// Errors that abort a pipeline run.
#[derive(Debug, Error)]
pub enum EtlError {
    /// Opening, reading or appending to a file failed.
    ///
    /// Preserves the path so the caller knows which side of the pipeline broke.
    #[error("io error on {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A line failed validation. `line` is the 1-based line number in the input.
    #[error("invalid record at line {line}")]
    Validation {
        line: u64,
        #[source]
        source: ValidationError,
    },

    /// The transform backend failed for a reason other than validation.
    #[error("transform backend failed: {0}")]
    Backend(String),

    #[error("configuration error: {0}")]
    Config(String),

    /// Processing was cancelled via the cancellation token.
    #[error("operation cancelled")]
    Cancelled,

    /// A spawned write task panicked or was aborted.
    #[error("write task failed: {0}")]
    WriterTask(String),

    /// Failed to serialize a record.
    #[error("serialization failed")]
    Serialize(#[from] serde_json::Error),
}

/// Failure of a single line transformation.
///
/// Kept apart from [`EtlError`] so the batch processor can tell a bad line,
/// which an error policy may skip, from a failure that must stop the run.
#[derive(Debug, Error)]
pub enum TransformError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),

    #[error(transparent)]
    Fatal(#[from] EtlError),
}

impl EtlError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        EtlError::Io {
            path: path.into(),
            source,
        }
    }
}
