//! Error types for ArchivArt Core
//!
//! Covers:
//! - Input validation failures (collected per field)
//! - Authorization denials carrying the missing permissions
//! - Malformed permission names, image hashes and password hashes

use crate::image_hash::HashError;
use serde::{Deserialize, Serialize};

/// Main core error type
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// One or more fields failed validation
    #[error("validation failed: {}", summarize(.0))]
    Validation(Vec<FieldError>),

    /// Principal lacks the required permissions
    #[error("insufficient permissions: requires {}", required.join(", "))]
    Forbidden {
        /// Permission names that would have satisfied the check
        required: Vec<String>,
    },

    /// Permission name is not of the form `module.action`
    #[error("invalid permission name: {0}")]
    InvalidPermissionName(String),

    /// Image hash could not be parsed
    #[error("invalid image hash: {0}")]
    Hash(#[from] HashError),

    /// Password hashing backend failed
    #[error("password hashing failed: {0}")]
    Password(String),
}

impl CoreError {
    /// Build a validation error for a single field
    #[inline]
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation(vec![FieldError::new(field, message)])
    }

    /// Check if error was caused by client input
    #[inline]
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        !matches!(self, Self::Password(_))
    }

    /// Field errors, if this is a validation failure
    #[inline]
    #[must_use]
    pub fn field_errors(&self) -> &[FieldError] {
        match self {
            Self::Validation(errors) => errors,
            _ => &[],
        }
    }
}

fn summarize(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| format!("{}: {}", e.field, e.message))
        .collect::<Vec<_>>()
        .join("; ")
}

/// A single rejected input field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    /// Field name as it appears in the request
    pub field: String,
    /// Human readable reason
    pub message: String,
}

impl FieldError {
    /// Create new field error
    #[inline]
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Result alias for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_message_lists_fields() {
        let err = CoreError::Validation(vec![
            FieldError::new("email", "Please provide a valid email"),
            FieldError::new("name", "Name is required"),
        ]);
        let msg = err.to_string();
        assert!(msg.contains("email: Please provide a valid email"));
        assert!(msg.contains("name: Name is required"));
        assert_eq!(err.field_errors().len(), 2);
    }

    #[test]
    fn forbidden_lists_required() {
        let err = CoreError::Forbidden {
            required: vec!["users.view".into(), "users.update".into()],
        };
        assert_eq!(
            err.to_string(),
            "insufficient permissions: requires users.view, users.update"
        );
        assert!(err.is_client_error());
        assert!(err.field_errors().is_empty());
    }

    #[test]
    fn password_failure_is_not_client_error() {
        assert!(!CoreError::Password("boom".into()).is_client_error());
    }
}
