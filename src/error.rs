//! Unified error model for the indexed cache engine.
//! Distinguishes schema-level validation failures (missing primary key, unique
//! violations) from runtime/store failures so callers can branch on recovery
//! strategy, per the propagation policy the engine documents for its hooks.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Coarse classification of a [`CacheError`], useful for callers that want to
/// branch on recovery strategy without matching every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheErrorKind {
    MissingPrimaryKey,
    UniqueViolation,
    NotFound,
    Store,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CacheError {
    /// `entity[PK]` absent on `set`/`update`. Fatal to the call; no state change.
    MissingPrimaryKey { field: String, message: String },
    /// A unique index's `set.before` hook found the encoded key already occupied
    /// by a different primary key. The primary write does not occur.
    UniqueViolation { namespace: String, message: String },
    /// Store `delete` (or an index hook reading a pre-image) found no entity.
    NotFound { namespace: String, key: String },
    /// Any underlying store failure, propagated unchanged.
    Store { message: String },
}

impl CacheError {
    pub fn missing_primary_key(field: impl Into<String>) -> Self {
        let field = field.into();
        CacheError::MissingPrimaryKey {
            message: format!("primary key field '{field}' not present in entity"),
            field,
        }
    }

    pub fn unique_violation(namespace: impl Into<String>, message: impl Into<String>) -> Self {
        CacheError::UniqueViolation { namespace: namespace.into(), message: message.into() }
    }

    pub fn not_found(namespace: impl Into<String>, key: impl Into<String>) -> Self {
        CacheError::NotFound { namespace: namespace.into(), key: key.into() }
    }

    pub fn store(message: impl Into<String>) -> Self {
        CacheError::Store { message: message.into() }
    }

    pub fn kind(&self) -> CacheErrorKind {
        match self {
            CacheError::MissingPrimaryKey { .. } => CacheErrorKind::MissingPrimaryKey,
            CacheError::UniqueViolation { .. } => CacheErrorKind::UniqueViolation,
            CacheError::NotFound { .. } => CacheErrorKind::NotFound,
            CacheError::Store { .. } => CacheErrorKind::Store,
        }
    }

    /// True for schema-level validation errors that leave state untouched, as
    /// opposed to runtime/I/O errors.
    pub fn is_validation(&self) -> bool {
        matches!(self.kind(), CacheErrorKind::MissingPrimaryKey | CacheErrorKind::UniqueViolation)
    }
}

impl Display for CacheError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheError::MissingPrimaryKey { message, .. } => write!(f, "missing_primary_key: {message}"),
            CacheError::UniqueViolation { message, .. } => write!(f, "unique_violation: {message}"),
            CacheError::NotFound { namespace, key } => {
                write!(f, "not_found: key '{key}' absent in namespace '{namespace}'")
            }
            CacheError::Store { message } => write!(f, "store_error: {message}"),
        }
    }
}

impl std::error::Error for CacheError {}

pub type CacheResult<T> = Result<T, CacheError>;
