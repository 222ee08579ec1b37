//! Error types for the simulated cloud
//!
//! TigerStyle: Errors mirror what a real cloud client reports.
//!
//! A resource that exists but is owned by another tenant reports
//! `NotFound`, exactly like a resource that does not exist.

use std::fmt;

/// Simulated cloud result type
pub type Result<T> = std::result::Result<T, CloudError>;

/// Kind of resource named in a `NotFound` error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Flavor,
    Server,
    Volume,
    Host,
    Instance,
}

impl ResourceKind {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Flavor => "flavor",
            Self::Server => "server",
            Self::Volume => "volume",
            Self::Host => "host",
            Self::Instance => "instance",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by the simulated provider
#[derive(Debug, thiserror::Error)]
pub enum CloudError {
    /// Unknown id, or an id the caller is not allowed to see
    #[error("{kind} not found: {id}")]
    NotFound { kind: ResourceKind, id: String },

    /// The simulated provider rejected the request
    #[error("client error: {0}")]
    Client(String),

    /// An operation or a caller-side poll ran out of time
    #[error("timed out: {0}")]
    Timeout(String),

    /// The context failed an authorization check
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Operation not legal in the resource's current status
    #[error("{id} is in status {status}, expected {expected}")]
    IllegalState {
        id: String,
        status: String,
        expected: String,
    },

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CloudError {
    /// Create a not-found error
    pub fn not_found(kind: ResourceKind, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Create a client error
    pub fn client(msg: impl Into<String>) -> Self {
        Self::Client(msg.into())
    }

    /// Create a timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Check if this is a not-found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_message_hides_reason() {
        let err = CloudError::not_found(ResourceKind::Server, "FAKE_1");
        assert_eq!(err.to_string(), "server not found: FAKE_1");
        assert!(err.is_not_found());
    }

    #[test]
    fn test_illegal_state_message() {
        let err = CloudError::IllegalState {
            id: "FAKE_1".to_string(),
            status: "ACTIVE".to_string(),
            expected: "VERIFY_RESIZE".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "FAKE_1 is in status ACTIVE, expected VERIFY_RESIZE"
        );
        assert!(!err.is_not_found());
    }
}
