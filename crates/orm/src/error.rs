//! Error types for the ORM layer
//!
//! Provides error handling for registry construction, entity validation,
//! store access, and relation resolution.

use std::fmt;

/// Result type alias for ORM operations
pub type OrmResult<T> = Result<T, OrmError>;

/// Error types for ORM operations
#[derive(Debug, Clone)]
pub enum OrmError {
    /// Bad or incomplete relation/model registration, detected at registry
    /// build time. Fatal: aborts initialization.
    Configuration(String),
    /// Entity or directive validation failed; the offending operation is
    /// aborted before any write is submitted.
    Validation(String),
    /// Underlying store get/query/update/subscribe failure.
    Store(String),
    /// Read of a nonexistent entity. Absence is surfaced as an error rather
    /// than a null, since a missing node is ambiguous with "not yet loaded"
    /// for this kind of store.
    NotFound(String),
    /// Entity (de)serialization error.
    Serialization(String),
}

impl fmt::Display for OrmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrmError::Configuration(msg) => write!(f, "Configuration error: {}", msg),
            OrmError::Validation(msg) => write!(f, "Validation error: {}", msg),
            OrmError::Store(msg) => write!(f, "Store error: {}", msg),
            OrmError::NotFound(path) => write!(f, "Not found: no value at '{}'", path),
            OrmError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
        }
    }
}

impl std::error::Error for OrmError {}

// Convert from serde_json errors
impl From<serde_json::Error> for OrmError {
    fn from(err: serde_json::Error) -> Self {
        OrmError::Serialization(err.to_string())
    }
}

// Convert from anyhow errors
impl From<anyhow::Error> for OrmError {
    fn from(err: anyhow::Error) -> Self {
        OrmError::Store(err.to_string())
    }
}
