//! Error types for the lifecycle engine
//!
//! Errors are grouped the same way the engine reacts to them: configuration
//! errors block bring-up of a class, protocol violations abort a single
//! operation and leave the object in its last valid state, and resource
//! errors simply leave an optional feature (tracing) disabled.

use crate::lifecycle::class::{ClassId, CondId};
use crate::lifecycle::ports::ObjectId;
use crate::lifecycle::state::LifecycleState;
use thiserror::Error;

/// Unified error type for the engine
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Class not registered: {class_id}")]
    ClassNotRegistered { class_id: ClassId },

    #[error("Class already registered: {class_id}")]
    ClassAlreadyRegistered { class_id: ClassId },

    #[error("Class {class_id} failed verification: {}", violations.join("; "))]
    Verification {
        class_id: ClassId,
        violations: Vec<String>,
    },

    #[error("Config parse error: {0}")]
    ConfigParse(String),

    // =========================================================================
    // Protocol Violations
    // =========================================================================
    #[error("Invalid state transition for object {object_id}: {from} -> {to}")]
    InvalidTransition {
        object_id: ObjectId,
        from: LifecycleState,
        to: LifecycleState,
    },

    #[error("Condition {cond_id} not found in hierarchy of class {class_id}")]
    ConditionNotFound { class_id: ClassId, cond_id: CondId },

    #[error("Lifecycle instance of object {object_id} is corrupt or destroyed")]
    CorruptInstance { object_id: ObjectId },

    #[error("Crank already in flight for object {object_id}")]
    CrankInProgress { object_id: ObjectId },

    // =========================================================================
    // Resource Errors
    // =========================================================================
    #[error("Insufficient trace capacity: requested {requested}, minimum {minimum}")]
    InsufficientTraceCapacity { requested: usize, minimum: usize },

    // =========================================================================
    // Internal / IO Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Broad category of an error, mirroring how callers must react to it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Malformed class metadata or configuration; blocks bring-up
    Configuration,
    /// Invalid request against a live object; operation aborted
    Protocol,
    /// A requested resource was too small; feature stays disabled
    Resource,
    /// Environment failures (IO, parsing, internal faults)
    Internal,
}

impl Error {
    /// Determine the category of this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Configuration(_)
            | Error::ClassNotRegistered { .. }
            | Error::ClassAlreadyRegistered { .. }
            | Error::Verification { .. }
            | Error::ConfigParse(_) => ErrorCategory::Configuration,

            Error::InvalidTransition { .. }
            | Error::ConditionNotFound { .. }
            | Error::CorruptInstance { .. }
            | Error::CrankInProgress { .. } => ErrorCategory::Protocol,

            Error::InsufficientTraceCapacity { .. } => ErrorCategory::Resource,

            Error::Internal(_) | Error::JsonParse(_) | Error::Io(_) => ErrorCategory::Internal,
        }
    }

    /// Configuration errors must stop bring-up of the affected class
    pub fn is_fatal(&self) -> bool {
        matches!(self.category(), ErrorCategory::Configuration)
    }

    /// Check if this error was caused by the caller's request against a live object
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self.category(), ErrorCategory::Protocol)
    }
}

/// Result type alias for the engine
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        let err = Error::Verification {
            class_id: ClassId(3),
            violations: vec!["bad".into()],
        };
        assert_eq!(err.category(), ErrorCategory::Configuration);
        assert!(err.is_fatal());

        let err = Error::InvalidTransition {
            object_id: ObjectId(7),
            from: LifecycleState::Specialize,
            to: LifecycleState::Destroy,
        };
        assert_eq!(err.category(), ErrorCategory::Protocol);
        assert!(err.is_protocol_violation());
        assert!(!err.is_fatal());

        let err = Error::InsufficientTraceCapacity {
            requested: 2,
            minimum: 8,
        };
        assert_eq!(err.category(), ErrorCategory::Resource);
        assert!(!err.is_protocol_violation());
    }

    #[test]
    fn test_error_display() {
        let err = Error::ConditionNotFound {
            class_id: ClassId(2),
            cond_id: CondId::new(ClassId(5), 1),
        };
        assert_eq!(
            err.to_string(),
            "Condition 5.1 not found in hierarchy of class 2"
        );

        let err = Error::Verification {
            class_id: ClassId(1),
            violations: vec!["a".into(), "b".into()],
        };
        assert_eq!(err.to_string(), "Class 1 failed verification: a; b");
    }
}
