//! Error types for the role graph engine

use crate::types::{ResourceRef, RoleId};
use thiserror::Error;

/// Role graph errors
#[derive(Debug, Error)]
pub enum RbacError {
    /// Referenced role does not exist
    #[error("Role not found: {0}")]
    RoleNotFound(RoleId),

    /// Referenced content object has no roles
    #[error("Resource not found: {0}")]
    ResourceNotFound(ResourceRef),

    /// Role identity is neither a valid singleton nor a valid object role
    #[error("Invalid role identity: {0}")]
    InvalidRoleIdentity(String),

    /// Ancestor rebuilding did not reach a fixed point
    #[error("Ancestry rebuilding did not converge after {iterations} sweeps: {reason}")]
    Convergence { iterations: usize, reason: String },

    /// Session can no longer be committed
    #[error("Session poisoned: {0}")]
    SessionPoisoned(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RbacError {
    /// Fatal errors signal a data-integrity problem and must abort the
    /// enclosing transaction.
    pub fn is_fatal(&self) -> bool {
        matches!(self, RbacError::Convergence { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RbacError::RoleNotFound(_) | RbacError::ResourceNotFound(_))
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for RbacError {
    fn from(e: sqlx::Error) -> Self {
        RbacError::Database(e.to_string())
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::migrate::MigrateError> for RbacError {
    fn from(e: sqlx::migrate::MigrateError) -> Self {
        RbacError::Database(format!("Migration failed: {}", e))
    }
}

/// Result type for role graph operations
pub type Result<T> = std::result::Result<T, RbacError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convergence_is_fatal() {
        let err = RbacError::Convergence {
            iterations: 100,
            reason: "iteration bound reached".to_string(),
        };
        assert!(err.is_fatal());
        assert!(err.to_string().contains("did not converge"));

        assert!(!RbacError::RoleNotFound(RoleId(1)).is_fatal());
        assert!(RbacError::RoleNotFound(RoleId(1)).is_not_found());
    }
}
