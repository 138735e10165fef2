//! Cluster client for resources inside run namespaces.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Secret, ServiceAccount};
use k8s_openapi::api::rbac::v1::RoleBinding;
use kube::api::PostParams;
use kube::{Api, Client};

use crate::crd::TaskRun;
use crate::error::OperatorResult;

/// Contract for creating and reading resources inside a run
/// namespace.
#[async_trait]
pub trait RunNamespaceClient: Send + Sync {
    /// Create a secret.
    async fn create_secret(&self, namespace: &str, secret: &Secret) -> OperatorResult<()>;

    /// Create a service account.
    async fn create_service_account(
        &self,
        namespace: &str,
        account: &ServiceAccount,
    ) -> OperatorResult<()>;

    /// Create a role binding.
    async fn create_role_binding(
        &self,
        namespace: &str,
        binding: &RoleBinding,
    ) -> OperatorResult<()>;

    /// Create a task run.
    async fn create_task_run(&self, namespace: &str, task_run: &TaskRun) -> OperatorResult<()>;

    /// Fetch a task run by name. `None` when it does not exist.
    async fn get_task_run(&self, namespace: &str, name: &str) -> OperatorResult<Option<TaskRun>>;
}

/// Client writing through the API server.
#[derive(Clone)]
pub struct KubeRunNamespaceClient {
    client: Client,
}

impl KubeRunNamespaceClient {
    /// Create a new client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RunNamespaceClient for KubeRunNamespaceClient {
    async fn create_secret(&self, namespace: &str, secret: &Secret) -> OperatorResult<()> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        api.create(&PostParams::default(), secret).await?;
        Ok(())
    }

    async fn create_service_account(
        &self,
        namespace: &str,
        account: &ServiceAccount,
    ) -> OperatorResult<()> {
        let api: Api<ServiceAccount> = Api::namespaced(self.client.clone(), namespace);
        api.create(&PostParams::default(), account).await?;
        Ok(())
    }

    async fn create_role_binding(
        &self,
        namespace: &str,
        binding: &RoleBinding,
    ) -> OperatorResult<()> {
        let api: Api<RoleBinding> = Api::namespaced(self.client.clone(), namespace);
        api.create(&PostParams::default(), binding).await?;
        Ok(())
    }

    async fn create_task_run(&self, namespace: &str, task_run: &TaskRun) -> OperatorResult<()> {
        let api: Api<TaskRun> = Api::namespaced(self.client.clone(), namespace);
        api.create(&PostParams::default(), task_run).await?;
        Ok(())
    }

    async fn get_task_run(&self, namespace: &str, name: &str) -> OperatorResult<Option<TaskRun>> {
        let api: Api<TaskRun> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }
}
