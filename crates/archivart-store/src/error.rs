//! Error types for the ArchivArt store

use archivart_core::CoreError;

/// Store error type
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// SQLite failure
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Row does not exist (or is inactive where activity is required)
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Entity kind
        entity: &'static str,
        /// Requested key
        id: String,
    },

    /// Uniqueness rule violated
    #[error("{message}")]
    Conflict {
        /// Offending field
        field: &'static str,
        /// Human readable reason
        message: String,
    },

    /// Entity is protected from the requested change
    #[error("{0}")]
    Protected(String),

    /// Input rejected by a domain rule
    #[error(transparent)]
    Invalid(#[from] CoreError),

    /// Stored JSON could not be encoded or decoded
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    /// Build a not-found error
    #[inline]
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Build a conflict error
    #[inline]
    pub fn conflict(field: &'static str, message: impl Into<String>) -> Self {
        Self::Conflict {
            field,
            message: message.into(),
        }
    }

    /// Check if error is a missing row
    #[inline]
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Check if error is a uniqueness violation, including ones caught by SQLite
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        match self {
            Self::Conflict { .. } => true,
            Self::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => {
                err.code == rusqlite::ErrorCode::ConstraintViolation
            }
            _ => false,
        }
    }

    /// Check if error protects a system entity
    #[inline]
    #[must_use]
    pub fn is_protected(&self) -> bool {
        matches!(self, Self::Protected(_))
    }
}

/// Result alias for store operations
pub type Result<T> = std::result::Result<T, StoreError>;
