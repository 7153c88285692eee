//! Error types for permission resolution

use std::fmt::Display;
use std::time::Duration;
use thiserror::Error;

/// Permission resolution errors
#[derive(Debug, Error)]
pub enum PermissionsError {
    /// Tenant identifier missing from the request
    #[error("tenant ID not found in request")]
    MissingTenantContext,

    /// User identifier missing from the request
    #[error("user ID not found in request")]
    MissingUserContext,

    /// Pool creation or connection acquisition failed
    #[error("Connection error: {0}")]
    Connection(String),

    /// Database credential could not be obtained or parsed
    #[error("Credential error: {0}")]
    Credential(String),

    /// Transaction begin/query/scan/commit failure
    #[error("{operation}: {message}")]
    Query {
        /// Failing statement or step
        operation: &'static str,
        /// Backend error text
        message: String,
    },

    /// Permission override row carried an unrecognised discriminator
    #[error("unknown permission type: {0}")]
    UnknownPermissionType(String),

    /// Error wrapped with the operation that produced it
    #[error("{operation}: {source}")]
    Operation {
        /// Operation name
        operation: &'static str,
        /// Underlying error
        #[source]
        source: Box<PermissionsError>,
    },

    /// Request was cancelled before it completed
    #[error("request cancelled")]
    Cancelled,

    /// Request exceeded its deadline
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PermissionsError {
    /// Build a query error from any backend error
    pub fn query(operation: &'static str, err: impl Display) -> Self {
        PermissionsError::Query {
            operation,
            message: err.to_string(),
        }
    }

    /// Wrap this error with the name of the failing operation
    pub fn context(self, operation: &'static str) -> Self {
        PermissionsError::Operation {
            operation,
            source: Box::new(self),
        }
    }

    /// Innermost error, skipping operation wrappers
    pub fn root(&self) -> &PermissionsError {
        match self {
            PermissionsError::Operation { source, .. } => source.root(),
            other => other,
        }
    }

    /// True for errors caused by a malformed request rather than the backend
    pub fn is_context_error(&self) -> bool {
        matches!(
            self.root(),
            PermissionsError::MissingTenantContext | PermissionsError::MissingUserContext
        )
    }
}

/// Result type for permission resolution
pub type Result<T> = std::result::Result<T, PermissionsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_chains_operation_names() {
        let err = PermissionsError::query("query user_roles", "relation does not exist")
            .context("get direct roles")
            .context("get user roles");

        assert_eq!(
            err.to_string(),
            "get user roles: get direct roles: query user_roles: relation does not exist"
        );
        assert!(matches!(err.root(), PermissionsError::Query { .. }));
    }

    #[test]
    fn test_context_error_detection() {
        assert!(PermissionsError::MissingTenantContext.is_context_error());
        assert!(PermissionsError::MissingUserContext
            .context("get user roles")
            .is_context_error());
        assert!(!PermissionsError::Cancelled.is_context_error());
    }
}
