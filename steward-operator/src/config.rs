//! Operator configuration.
//!
//! All inputs are read from `STEWARD_*` environment variables with
//! sensible defaults, so the operator runs unconfigured in a cluster
//! that uses the standard resource names.

use std::env;

use crate::error::{OperatorError, OperatorResult};

/// Configuration for the Steward operator.
#[derive(Debug, Clone)]
pub struct OperatorConfig {
    /// Prefix of run namespace names. Also the value of the `prefix`
    /// label that authenticates a namespace as operator-managed.
    pub run_namespace_prefix: String,
    /// Number of random base-36 characters appended to run namespace
    /// names. Zero disables the suffix.
    pub run_namespace_suffix_length: u8,
    /// Timeout attached to every task run, in seconds.
    pub default_build_timeout_seconds: u64,
    /// Cluster role bound to the `run-bot` service account in each
    /// run namespace.
    pub run_cluster_role: String,
    /// Image pull secret copied into every run namespace. Empty
    /// disables the copy.
    pub image_pull_secret: String,
    /// SCM clone secret copied into every run namespace. Empty
    /// disables the copy.
    pub scm_clone_secret: String,
    /// Number of concurrent reconcile workers.
    pub workers: u16,
    /// Port the `/metrics` endpoint listens on.
    pub metrics_port: u16,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            run_namespace_prefix: "steward-run".to_string(),
            run_namespace_suffix_length: 16,
            default_build_timeout_seconds: 3600,
            run_cluster_role: "steward-run".to_string(),
            image_pull_secret: String::new(),
            scm_clone_secret: String::new(),
            workers: 2,
            metrics_port: 9090,
        }
    }
}

impl OperatorConfig {
    /// Create configuration from environment variables.
    ///
    /// Environment variables:
    /// - `STEWARD_RUN_NAMESPACE_PREFIX`: run namespace prefix
    /// - `STEWARD_RUN_NAMESPACE_SUFFIX_LENGTH`: random suffix length
    /// - `STEWARD_DEFAULT_BUILD_TIMEOUT_SECONDS`: task run timeout
    /// - `STEWARD_RUN_CLUSTER_ROLE`: cluster role for run namespaces
    /// - `STEWARD_IMAGE_PULL_SECRET`: image pull secret name
    /// - `STEWARD_SCM_CLONE_SECRET`: SCM clone secret name
    /// - `STEWARD_WORKERS`: reconcile concurrency
    /// - `STEWARD_METRICS_PORT`: metrics endpoint port
    pub fn from_env() -> OperatorResult<Self> {
        let mut config = Self::default();

        if let Ok(prefix) = env::var("STEWARD_RUN_NAMESPACE_PREFIX") {
            if prefix.is_empty() {
                return Err(OperatorError::InvalidConfig(
                    "STEWARD_RUN_NAMESPACE_PREFIX must not be empty".into(),
                ));
            }
            config.run_namespace_prefix = prefix;
        }
        if let Ok(value) = env::var("STEWARD_RUN_NAMESPACE_SUFFIX_LENGTH") {
            config.run_namespace_suffix_length = parse(&value, "STEWARD_RUN_NAMESPACE_SUFFIX_LENGTH")?;
        }
        if let Ok(value) = env::var("STEWARD_DEFAULT_BUILD_TIMEOUT_SECONDS") {
            config.default_build_timeout_seconds =
                parse(&value, "STEWARD_DEFAULT_BUILD_TIMEOUT_SECONDS")?;
        }
        if let Ok(role) = env::var("STEWARD_RUN_CLUSTER_ROLE") {
            config.run_cluster_role = role;
        }
        if let Ok(secret) = env::var("STEWARD_IMAGE_PULL_SECRET") {
            config.image_pull_secret = secret;
        }
        if let Ok(secret) = env::var("STEWARD_SCM_CLONE_SECRET") {
            config.scm_clone_secret = secret;
        }
        if let Ok(value) = env::var("STEWARD_WORKERS") {
            config.workers = parse(&value, "STEWARD_WORKERS")?;
            if config.workers == 0 {
                return Err(OperatorError::InvalidConfig(
                    "STEWARD_WORKERS must be at least 1".into(),
                ));
            }
        }
        if let Ok(value) = env::var("STEWARD_METRICS_PORT") {
            config.metrics_port = parse(&value, "STEWARD_METRICS_PORT")?;
        }

        Ok(config)
    }
}

fn parse<T: std::str::FromStr>(value: &str, variable: &str) -> OperatorResult<T> {
    value
        .parse()
        .map_err(|_| OperatorError::InvalidConfig(format!("{variable}: cannot parse '{value}'")))
}
