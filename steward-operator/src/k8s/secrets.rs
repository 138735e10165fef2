//! Secret retrieval and copying.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::api::ObjectMeta;
use kube::{Api, Client};

use crate::error::{OperatorError, OperatorResult};

/// Contract for looking up the secrets a pipeline run requests.
///
/// Secrets are looked up in the pipeline run's own namespace, so the
/// namespace travels with every call.
#[async_trait]
pub trait SecretProvider: Send + Sync {
    /// Fetch a secret by name from `namespace`. A missing secret is
    /// an error carrying both.
    async fn get_secret(&self, namespace: &str, name: &str) -> OperatorResult<Secret>;
}

/// Secret provider reading through the API server.
#[derive(Clone)]
pub struct KubeSecretProvider {
    client: Client,
}

impl KubeSecretProvider {
    /// Create a new provider.
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SecretProvider for KubeSecretProvider {
    async fn get_secret(&self, namespace: &str, name: &str) -> OperatorResult<Secret> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        match api.get_opt(name).await? {
            Some(secret) => Ok(secret),
            None => Err(OperatorError::MissingSecret {
                name: name.to_string(),
                namespace: namespace.to_string(),
            }),
        }
    }
}

/// Build a copy of `source` for creation in `target_namespace`.
///
/// The copy carries the source's data, string data, type, labels and
/// annotations. Ownership, UID and resource version are dropped so
/// the copy is a fresh object in the target namespace.
pub fn copy_of(source: &Secret, name: &str, target_namespace: &str) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(target_namespace.to_string()),
            labels: source.metadata.labels.clone(),
            annotations: source.metadata.annotations.clone(),
            ..Default::default()
        },
        data: source.data.clone(),
        string_data: source.string_data.clone(),
        type_: source.type_.clone(),
        ..Default::default()
    }
}
