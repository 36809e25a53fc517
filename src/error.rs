//! Error taxonomy shared by every storage layer.
//!
//! Engine failures are translated into these kinds at the executor boundary,
//! so no raw `rusqlite::Error` leaves the crate.

use std::fmt;

use thiserror::Error;

/// Which integrity rule a write violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintKind {
    /// UNIQUE or PRIMARY KEY collision
    Unique,
    /// Referenced parent row does not exist
    ForeignKey,
    /// Required column was NULL
    NotNull,
    /// CHECK expression failed (e.g. malformed JSON payload)
    Check,
    /// Any other constraint reported by the engine
    Other,
}

impl fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConstraintKind::Unique => "unique",
            ConstraintKind::ForeignKey => "foreign key",
            ConstraintKind::NotNull => "not null",
            ConstraintKind::Check => "check",
            ConstraintKind::Other => "integrity",
        };
        f.write_str(label)
    }
}

/// Errors that can occur anywhere in the storage subsystem.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Store unreachable, locked, closed, or its directory could not be created
    #[error("Connection error: {0}")]
    Connection(String),

    /// Malformed SQL or missing table/column
    #[error("Query error: {0}")]
    Query(String),

    /// BEGIN/COMMIT/ROLLBACK failed at the engine level
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Write rejected by an integrity rule
    #[error("Constraint error ({kind}): {message}")]
    Constraint {
        kind: ConstraintKind,
        message: String,
    },

    /// Payload does not satisfy a table's contract
    #[error("Validation error: {0}")]
    Validation(String),
}

impl StoreError {
    /// Shorthand for building a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        StoreError::Validation(message.into())
    }

    /// Returns true for errors the caller can fix by changing its input.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            StoreError::Validation(_) | StoreError::Constraint { .. }
        )
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Validation(err.to_string())
    }
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constraint_error_message_names_the_kind() {
        let err = StoreError::Constraint {
            kind: ConstraintKind::ForeignKey,
            message: "FOREIGN KEY constraint failed".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Constraint error (foreign key): FOREIGN KEY constraint failed"
        );
    }

    #[test]
    fn caller_errors_are_validation_and_constraint() {
        assert!(StoreError::validation("bad").is_caller_error());
        assert!(
            StoreError::Constraint {
                kind: ConstraintKind::Unique,
                message: String::new(),
            }
            .is_caller_error()
        );
        assert!(!StoreError::Query("no such table".into()).is_caller_error());
        assert!(!StoreError::Connection("closed".into()).is_caller_error());
    }

    #[test]
    fn serde_errors_become_validation_errors() {
        let err: StoreError = serde_json::from_str::<u8>("\"x\"").unwrap_err().into();
        assert!(matches!(err, StoreError::Validation(_)));
    }
}
