//! Error types for gatewarden
//!
//! This module defines the error hierarchy used throughout the engine.
//! We use `thiserror` for library-style errors that are part of the API;
//! front-ends convert them to their own presentation at the boundary.

use thiserror::Error;

/// Top-level application error
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Policy error: {0}")]
    Policy(#[from] PolicyError),

    #[error("Access denied: {0}")]
    AccessDenied(#[from] AccessDeniedError),

    #[error("Access request error: {0}")]
    Request(#[from] RequestError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(String),

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required configuration: {field}")]
    Missing { field: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Policy evaluation and role validation errors
#[derive(Error, Debug)]
pub enum PolicyError {
    /// Malformed role definition, rejected at load/validation time.
    #[error("Bad parameter: {message}")]
    BadParameter { message: String },

    /// The role set grants nothing at all for the requested resource class.
    /// Distinguished from an explicit deny to aid diagnostics.
    #[error("Not found: {message}")]
    NotFound { message: String },

    #[error(transparent)]
    AccessDenied(#[from] AccessDeniedError),
}

impl PolicyError {
    pub fn bad_parameter(message: impl Into<String>) -> Self {
        PolicyError::BadParameter {
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        PolicyError::NotFound {
            message: message.into(),
        }
    }

    pub fn is_access_denied(&self) -> bool {
        matches!(self, PolicyError::AccessDenied(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, PolicyError::NotFound { .. })
    }

    pub fn is_bad_parameter(&self) -> bool {
        matches!(self, PolicyError::BadParameter { .. })
    }
}

/// An explicit deny or a failure to find any matching allow.
///
/// Never retried; surfaced verbatim to the caller.
#[derive(Error, Debug)]
#[error("access to {resource} denied: {reason}")]
pub struct AccessDeniedError {
    pub resource: String,
    pub reason: String,
}

impl AccessDeniedError {
    pub fn new(resource: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            reason: reason.into(),
        }
    }

    pub fn no_allow_rule(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            reason: "no allow rule matched".into(),
        }
    }

    pub fn denied_by_rule(resource: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            reason: format!("denied by role '{}'", role.into()),
        }
    }

    pub fn labels_not_matched(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            reason: "no role in the set matches the resource labels".into(),
        }
    }

    pub fn login_not_listed(resource: impl Into<String>, login: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            reason: format!("login '{}' is not granted by any role", login.into()),
        }
    }

    pub fn session_ttl(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            reason: "requested session TTL exceeds the maximum allowed by every role".into(),
        }
    }
}

/// Access request state machine errors
#[derive(Error, Debug)]
pub enum RequestError {
    /// Self-approval, duplicate proposal, or insufficient approve scope.
    /// Recovered locally at admission time; the request is unchanged.
    #[error("Permission denied: {reason}")]
    PermissionDenied { reason: String },

    /// Proposal submitted against an APPROVED or DENIED request.
    #[error("access request {id} is already {state}")]
    InvalidState { id: String, state: String },

    #[error("Bad parameter: {message}")]
    BadParameter { message: String },

    #[error("access request {id} not found")]
    NotFound { id: String },

    /// The requester may not request one of the roles.
    #[error(transparent)]
    AccessDenied(#[from] AccessDeniedError),

    /// Conditional write kept failing; the whole submission should be retried.
    #[error("concurrent updates kept conflicting after {attempts} attempts")]
    Exhausted { attempts: u32 },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl RequestError {
    pub fn permission_denied(reason: impl Into<String>) -> Self {
        RequestError::PermissionDenied {
            reason: reason.into(),
        }
    }

    pub fn bad_parameter(message: impl Into<String>) -> Self {
        RequestError::BadParameter {
            message: message.into(),
        }
    }

    pub fn is_permission_denied(&self) -> bool {
        matches!(self, RequestError::PermissionDenied { .. })
    }

    pub fn is_invalid_state(&self) -> bool {
        matches!(self, RequestError::InvalidState { .. })
    }

    /// Whether the caller may usefully retry the whole submission.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RequestError::Exhausted { .. })
    }
}

/// Storage collaborator errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("record {id} not found")]
    NotFound { id: String },

    #[error("record {id} already exists")]
    AlreadyExists { id: String },

    /// Conditional write rejected: the record moved past the expected
    /// revision. Transient; retried by the caller's CAS loop.
    #[error("revision conflict on {id}: expected {expected}, found {actual}")]
    Conflict { id: String, expected: u64, actual: u64 },
}

impl StorageError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StorageError::Conflict { .. })
    }
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, AppError>;

/// Result type alias for policy evaluation
pub type PolicyResult<T> = std::result::Result<T, PolicyError>;

/// Result type alias for access request operations
pub type RequestResult<T> = std::result::Result<T, RequestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_error_predicates() {
        let err = PolicyError::bad_parameter("missing resources");
        assert!(err.is_bad_parameter());
        assert!(!err.is_access_denied());

        let err = PolicyError::not_found("no database names granted");
        assert!(err.is_not_found());

        let err = PolicyError::from(AccessDeniedError::no_allow_rule("node/a"));
        assert!(err.is_access_denied());
    }

    #[test]
    fn test_access_denied_constructors() {
        let err = AccessDeniedError::login_not_listed("node/b", "root");
        assert!(err.reason.contains("root"));

        let err = AccessDeniedError::denied_by_rule("db/prod", "deny-all");
        assert!(err.reason.contains("deny-all"));

        let err = AccessDeniedError::session_ttl("db/stage");
        assert!(err.reason.contains("TTL"));
    }

    #[test]
    fn test_request_error_retryability() {
        assert!(RequestError::Exhausted { attempts: 7 }.is_retryable());
        assert!(!RequestError::permission_denied("self-approval").is_retryable());
        assert!(
            RequestError::InvalidState {
                id: "r1".into(),
                state: "APPROVED".into()
            }
            .is_invalid_state()
        );
    }
}
