//! Error types for the API platform operator

use thiserror::Error;

/// Result type alias for operator operations
pub type Result<T> = std::result::Result<T, OperatorError>;

/// Errors that can occur during operator operations
#[derive(Debug, Error)]
pub enum OperatorError {
    /// Kubernetes API error, wrapped with the operation that failed
    #[error("Kubernetes API error: {0}")]
    KubeApi(String),

    /// Resource not found
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Create was rejected because the object already exists
    #[error("Resource already exists: {0}")]
    AlreadyExists(String),

    /// Write was rejected because the object changed since it was read
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Desired-state object failed validation
    #[error("Validation error: {0}")]
    Validation(String),

    /// The tenant service answered with an unexpected status code
    #[error("Tenant API error: {operation} returned ({status}) {body}")]
    TenantApi {
        operation: String,
        status: u16,
        body: String,
    },

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Install template could not be rendered
    #[error("Template error: {0}")]
    Template(String),

    /// Invalid resource state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl OperatorError {
    /// Wrap a kube error with the operation it interrupted.
    ///
    /// `AlreadyExists` and optimistic-concurrency conflicts get their own
    /// variants so callers can branch on them.
    pub fn kube(context: impl AsRef<str>, err: kube::Error) -> Self {
        let context = context.as_ref();
        match &err {
            kube::Error::Api(ae) if ae.code == 404 => {
                OperatorError::NotFound(format!("{}: {}", context, ae.message))
            }
            kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists" => {
                OperatorError::AlreadyExists(format!("{}: {}", context, ae.message))
            }
            kube::Error::Api(ae) if ae.code == 409 => {
                OperatorError::Conflict(format!("{}: {}", context, ae.message))
            }
            _ => OperatorError::KubeApi(format!("{}: {}", context, err)),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        OperatorError::Validation(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        OperatorError::InvalidState(msg.into())
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, OperatorError::AlreadyExists(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, OperatorError::NotFound(_))
    }
}

impl From<serde_json::Error> for OperatorError {
    fn from(err: serde_json::Error) -> Self {
        OperatorError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for OperatorError {
    fn from(err: serde_yaml::Error) -> Self {
        OperatorError::Serialization(err.to_string())
    }
}

impl From<reqwest::Error> for OperatorError {
    fn from(err: reqwest::Error) -> Self {
        OperatorError::Http(err.to_string())
    }
}

impl From<minijinja::Error> for OperatorError {
    fn from(err: minijinja::Error) -> Self {
        OperatorError::Template(err.to_string())
    }
}
