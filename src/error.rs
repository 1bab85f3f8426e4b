//! Error types for the column store

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Name '{0}' already exists")]
    DuplicateName(String),

    #[error("Column '{0}' not found")]
    UnknownColumn(String),

    #[error("Unknown selector '{0}'")]
    UnknownSelector(String),

    #[error("Type mismatch on column '{column}': expected {expected}, found {found}")]
    TypeMismatch {
        column: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("Row {row} is out of range (capacity {capacity})")]
    OutOfRange { row: usize, capacity: usize },

    #[error("Corrupt snapshot: {0}")]
    CorruptSnapshot(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Stable error code for callers that branch on the failure kind.
    pub fn code(&self) -> &'static str {
        match self {
            Error::DuplicateName(_) => "DUPLICATE_NAME",
            Error::UnknownColumn(_) => "UNKNOWN_COLUMN",
            Error::UnknownSelector(_) => "UNKNOWN_SELECTOR",
            Error::TypeMismatch { .. } => "TYPE_MISMATCH",
            Error::OutOfRange { .. } => "OUT_OF_RANGE",
            Error::CorruptSnapshot(_) => "CORRUPT_SNAPSHOT",
            Error::InvalidConfig(_) => "INVALID_CONFIG",
            _ => "INTERNAL_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::DuplicateName("a".into()).code(), "DUPLICATE_NAME");
        assert_eq!(Error::UnknownSelector("x".into()).code(), "UNKNOWN_SELECTOR");
        assert_eq!(
            Error::OutOfRange { row: 10, capacity: 4 }.code(),
            "OUT_OF_RANGE"
        );
        let io = Error::from(std::io::Error::new(std::io::ErrorKind::Other, "boom"));
        assert_eq!(io.code(), "INTERNAL_ERROR");
    }

    #[test]
    fn test_type_mismatch_message() {
        let err = Error::TypeMismatch {
            column: "age".into(),
            expected: "float64",
            found: "string",
        };
        let msg = err.to_string();
        assert!(msg.contains("age"), "unexpected message: {}", msg);
        assert!(msg.contains("float64"), "unexpected message: {}", msg);
    }
}
