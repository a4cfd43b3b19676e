//! Core error types for leaven-core.
//!
//! Engine errors are always returned as typed results so a front end can show
//! a message without tearing down the session. Storage and configuration
//! failures live in their own enums and are folded into [`CoreError`].

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::timeline::StepStatus;

/// Core error type for leaven-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Command or recalibration rejected by the engine
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Timeline construction errors
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Notification backend errors
    #[error("Notification error: {0}")]
    Notification(#[from] NotificationError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Generic errors with context
    #[error("{0}")]
    Custom(String),
}

/// Errors produced by the state machine and the recalibration engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// A state machine guard was violated.
    #[error("Invalid transition for step '{step_id}' ({status}): {reason}")]
    InvalidTransition {
        step_id: String,
        status: StepStatus,
        reason: String,
    },

    /// The recalibration request has a bad shape or target.
    #[error("Invalid recalibration: {0}")]
    InvalidRecalibration(String),

    /// Unknown step or timeline identifier.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// A derived timestamp precedes an earlier immutable one.
    ///
    /// Only ever logged; the engine clamps and carries on.
    #[error("Clock skew: derived time {derived} precedes {floor}")]
    ClockSkew {
        derived: DateTime<Utc>,
        floor: DateTime<Utc>,
    },
}

impl EngineError {
    pub(crate) fn step_not_found(id: impl Into<String>) -> Self {
        EngineError::NotFound {
            kind: "Step",
            id: id.into(),
        }
    }

    pub(crate) fn invalid_transition(
        step_id: impl Into<String>,
        status: StepStatus,
        reason: impl Into<String>,
    ) -> Self {
        EngineError::InvalidTransition {
            step_id: step_id.into(),
            status,
            reason: reason.into(),
        }
    }
}

/// Timeline validation errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// Invalid time range
    #[error("Invalid time range: end ({end}) must not precede start ({start})")]
    InvalidTimeRange {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    /// Empty collection
    #[error("Empty collection: {0}")]
    EmptyCollection(String),

    #[error("Duplicate {field}: {value}")]
    Duplicate { field: String, value: String },

    /// Invalid value
    #[error("Invalid value for '{field}': {message}")]
    InvalidValue { field: String, message: String },
}

/// Database-specific errors.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Failed to open database connection
    #[error("Failed to open database at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Stored row could not be decoded
    #[error("Corrupt row in {table}: {message}")]
    CorruptRow { table: String, message: String },

    /// Database is locked
    #[error("Database is locked")]
    Locked,
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    #[error("Unknown configuration key: {0}")]
    UnknownKey(String),

    /// Failed to parse configuration
    #[error("Failed to parse configuration: {0}")]
    ParseFailed(String),
}

/// Notification backend errors.
#[derive(Error, Debug)]
pub enum NotificationError {
    #[error("Backend rejected alarm for step '{step_id}': {message}")]
    Rejected { step_id: String, message: String },

    #[error("Failed to cancel alarms for bake '{bake_id}': {message}")]
    CancelFailed { bake_id: String, message: String },
}

impl From<rusqlite::Error> for DatabaseError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(inner, _msg) => {
                if inner.code == rusqlite::ErrorCode::DatabaseLocked {
                    DatabaseError::Locked
                } else {
                    DatabaseError::QueryFailed(err.to_string())
                }
            }
            _ => DatabaseError::QueryFailed(err.to_string()),
        }
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(err: rusqlite::Error) -> Self {
        CoreError::Database(err.into())
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_error_messages_name_the_step() {
        let err = EngineError::invalid_transition("shape", StepStatus::Pending, "not active");
        assert_eq!(
            err.to_string(),
            "Invalid transition for step 'shape' (pending): not active"
        );
        assert_eq!(
            EngineError::step_not_found("x").to_string(),
            "Step not found: x"
        );
    }

    #[test]
    fn engine_error_converts_into_core_error() {
        let core: CoreError = EngineError::InvalidRecalibration("missing target".into()).into();
        assert!(matches!(core, CoreError::Engine(_)));
        assert_eq!(core.to_string(), "Invalid recalibration: missing target");
    }

    #[test]
    fn locked_sqlite_maps_to_locked() {
        let err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_LOCKED),
            None,
        );
        assert!(matches!(DatabaseError::from(err), DatabaseError::Locked));
    }
}
