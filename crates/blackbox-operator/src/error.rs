//! Error types for the Blackbox Exporter operator

use blackbox_probes::error::ProbesError;
use thiserror::Error;

/// Errors that can occur during operator operations
#[derive(Error, Debug)]
pub enum OperatorError {
    /// The exporter configuration could not be built, written or reloaded
    #[error("{0}")]
    ConfigUpdateFailure(String),

    /// An operation presumed the workload container to be reachable
    #[error("Container not ready: {0}")]
    ContainerNotReady(String),

    /// Probes protocol error
    #[error(transparent)]
    Probes(#[from] ProbesError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Unknown or unsupported hook
    #[error("Unsupported event: {0}")]
    UnsupportedEvent(String),

    /// Resource limits could not be applied
    #[error("Failed to patch resource limits: {0}")]
    ResourcePatch(String),

    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    /// Exporter HTTP API error
    #[error("Exporter API error: {0}")]
    Http(#[from] reqwest::Error),

    /// Filesystem or process error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// YAML serialization error
    #[error("YAML serialization error: {0}")]
    YamlError(#[from] serde_yaml::Error),
}

/// Result type for operator operations
pub type Result<T> = std::result::Result<T, OperatorError>;

impl OperatorError {
    /// Whether the error needs operator intervention and should surface as
    /// a blocked status. Other errors are expected to clear on a later event.
    pub fn is_blocking(&self) -> bool {
        match self {
            OperatorError::ConfigUpdateFailure(_)
            | OperatorError::InvalidConfig(_)
            | OperatorError::ResourcePatch(_) => true,
            OperatorError::Probes(e) => e.is_config_error(),
            _ => false,
        }
    }
}
