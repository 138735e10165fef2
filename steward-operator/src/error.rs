//! Error types for the Steward operator.

use thiserror::Error;

/// Errors that can occur during operator operations.
#[derive(Debug, Error)]
pub enum OperatorError {
    /// Kubernetes API error.
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// JSON serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A secret requested by a pipeline run does not exist.
    #[error("secret '{name}' not found in namespace '{namespace}'")]
    MissingSecret {
        /// Secret name.
        name: String,
        /// Namespace that was searched.
        namespace: String,
    },

    /// The task run backing a pipeline run does not exist.
    #[error("task run '{name}' not found in namespace '{namespace}'")]
    MissingTaskRun {
        /// Task run name.
        name: String,
        /// Namespace that was searched.
        namespace: String,
    },

    /// A namespace delete was refused before any remote call was made.
    #[error("refused to delete namespace '{name}': {reason}")]
    NamespaceRefused {
        /// Namespace name the caller asked to delete.
        name: String,
        /// Why the delete was refused.
        reason: String,
    },

    /// The random source for namespace suffixes failed.
    #[error("failed to draw random namespace suffix: {0}")]
    RandomSource(String),

    /// Invalid operator configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Metrics registration error.
    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// IO error, e.g. while binding the metrics endpoint.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An error wrapped with the operation it failed in.
    #[error("{context}: {source}")]
    Context {
        /// What the operator was doing.
        context: String,
        /// The underlying error.
        #[source]
        source: Box<OperatorError>,
    },
}

impl OperatorError {
    /// Wrap an error with the operation it occurred in.
    pub fn context(context: impl Into<String>, source: OperatorError) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(source),
        }
    }
}

/// Result type for operator operations.
pub type OperatorResult<T> = Result<T, OperatorError>;
