//! Error types for the eviction autoscaler

use std::fmt;

/// Result type alias for controller operations
pub type Result<T> = std::result::Result<T, OperatorError>;

/// Errors that can occur while reconciling a node
#[derive(Debug)]
pub enum OperatorError {
    /// Kubernetes API error
    KubeApi(String),
    /// Optimistic concurrency conflict: the object changed since it was read
    Conflict(String),
    /// Configuration error
    Configuration(String),
    /// Serialization error
    Serialization(String),
    /// Label selector could not be parsed
    InvalidSelector(String),
}

impl OperatorError {
    /// Whether the error is a stale-version write conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, OperatorError::Conflict(_))
    }
}

impl fmt::Display for OperatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperatorError::KubeApi(msg) => write!(f, "Kubernetes API error: {}", msg),
            OperatorError::Conflict(msg) => write!(f, "Update conflict: {}", msg),
            OperatorError::Configuration(msg) => write!(f, "Configuration error: {}", msg),
            OperatorError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            OperatorError::InvalidSelector(msg) => write!(f, "Invalid label selector: {}", msg),
        }
    }
}

impl std::error::Error for OperatorError {}

impl From<kube::Error> for OperatorError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(ae) if ae.code == 409 => OperatorError::Conflict(ae.message),
            other => OperatorError::KubeApi(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for OperatorError {
    fn from(err: serde_json::Error) -> Self {
        OperatorError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_error(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: format!("{} happened", reason),
            reason: reason.to_string(),
            code,
        })
    }

    #[test]
    fn test_error_display() {
        let err = OperatorError::KubeApi("test error".to_string());
        assert!(err.to_string().contains("Kubernetes API error"));
        let err = OperatorError::InvalidSelector("bad op".to_string());
        assert!(err.to_string().contains("bad op"));
    }

    #[test]
    fn test_conflict_maps_from_409() {
        let err: OperatorError = api_error(409, "Conflict").into();
        assert!(err.is_conflict());
        assert!(err.to_string().contains("Conflict happened"));
    }

    #[test]
    fn test_other_api_errors_are_not_conflicts() {
        let err: OperatorError = api_error(500, "InternalError").into();
        assert!(!err.is_conflict());
        assert!(matches!(err, OperatorError::KubeApi(_)));
    }
}
