/// Error handling for the ingress control plane
use thiserror::Error;

/// Result type for control-plane operations
pub type Result<T> = std::result::Result<T, IngressError>;

/// Error types for control-plane operations
#[derive(Error, Debug)]
pub enum IngressError {
    /// Entry or object does not exist; benign in most flows
    #[error("not found: {0}")]
    NotFound(String),

    /// Config or label failed to parse; fatal to that object, never to the loop
    #[error("validation error: {0}")]
    Validation(String),

    /// The cluster API failed or is unreachable; aborts the current pass
    #[error("orchestrator error: {0}")]
    Orchestrator(String),

    /// An ACME order or authorization failed; retried on the next observe tick
    #[error("ACME failure: {0}")]
    Acme(String),

    /// A store invariant does not hold (missing dhparams, broken cert pair)
    #[error("invariant violated: {0}")]
    Invariant(String),

    /// Key, CSR, or DH parameter generation error
    #[error("crypto error: {0}")]
    Crypto(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl IngressError {
    /// Create a not-found error
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        IngressError::NotFound(msg.into())
    }

    /// Create a validation error
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        IngressError::Validation(msg.into())
    }

    /// Create an orchestrator error
    pub fn orchestrator<S: Into<String>>(msg: S) -> Self {
        IngressError::Orchestrator(msg.into())
    }

    /// Create an ACME failure
    pub fn acme<S: Into<String>>(msg: S) -> Self {
        IngressError::Acme(msg.into())
    }

    /// Create an invariant violation
    pub fn invariant<S: Into<String>>(msg: S) -> Self {
        IngressError::Invariant(msg.into())
    }

    /// Create a crypto error
    pub fn crypto<S: Into<String>>(msg: S) -> Self {
        IngressError::Crypto(msg.into())
    }
}
