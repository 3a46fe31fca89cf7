//! Error conditions raised while transcoding or decoding photon-stream files

use std::io;

#[derive(Debug, thiserror::Error)]
pub enum PhsError {
    /// Retained metadata field names differ from the reference set of this context
    #[error("Metadata schema mismatch: expected fields {expected:?}, found {found:?}")]
    SchemaMismatch {
        expected: Vec<String>,
        found: Vec<String>,
    },

    #[error("Event is missing required field '{0}'")]
    MissingField(&'static str),

    /// A value or length does not fit its declared on-disk width
    #[error("Value {value} of '{field}' is out of range (allowed {min}..={max})")]
    RangeOverflow {
        field: &'static str,
        value: i128,
        min: i128,
        max: i128,
    },

    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Invalid photon-stream data: {0}")]
    InvalidFormat(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Cannot {operation} after {state}")]
    OutOfOrder {
        state: &'static str,
        operation: &'static str,
    },

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, PhsError>;

impl PhsError {
    pub(crate) fn range(field: &'static str, value: impl Into<i128>, min: i128, max: i128) -> Self {
        PhsError::RangeOverflow {
            field,
            value: value.into(),
            min,
            max,
        }
    }

    /// Schema mismatches are invariant violations and stop a whole batch
    pub fn is_fatal(&self) -> bool {
        matches!(self, PhsError::SchemaMismatch { .. })
    }
}
