//! Provisioning and teardown of the per-run environment.

use async_trait::async_trait;
use chrono::Utc;
use kube::ResourceExt;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::OperatorConfig;
use crate::crd::{PipelineRun, PipelineRunStatus, RunResult};
use crate::error::{OperatorError, OperatorResult};
use crate::k8s::{
    copy_of, NamespaceManagement, PipelineRunClient, RunNamespaceClient, SecretProvider,
};

use super::resources::{
    build_role_binding, build_service_account, build_task_run, TASK_RUN_NAME,
};
use super::view::RunView;

/// Contract for managing the environment of a single run.
#[async_trait]
pub trait RunManagement: Send + Sync {
    /// Provision the run environment and launch the task run.
    ///
    /// The created namespace is recorded on `status` and persisted
    /// before anything else is created, so a later failure (or a
    /// controller crash) can always be rolled back from the recorded
    /// name. Any failure after namespace creation triggers a cleanup
    /// attempt before the original error is returned.
    async fn start(
        &self,
        pipeline_run: &PipelineRun,
        status: &mut PipelineRunStatus,
    ) -> OperatorResult<()>;

    /// Fetch the backing task run as a read-only view.
    async fn get_run(&self, status: &PipelineRunStatus) -> OperatorResult<RunView>;

    /// Tear down the run namespace. Succeeds when there is nothing
    /// to clean up.
    async fn cleanup(&self, status: &mut PipelineRunStatus) -> OperatorResult<()>;
}

/// Manages run environments through the cluster collaborators.
#[derive(Clone)]
pub struct RunManager {
    namespaces: Arc<dyn NamespaceManagement>,
    secrets: Arc<dyn SecretProvider>,
    cluster: Arc<dyn RunNamespaceClient>,
    pipeline_runs: Arc<dyn PipelineRunClient>,
    config: Arc<OperatorConfig>,
}

impl RunManager {
    /// Create a new run manager.
    pub fn new(
        namespaces: Arc<dyn NamespaceManagement>,
        secrets: Arc<dyn SecretProvider>,
        cluster: Arc<dyn RunNamespaceClient>,
        pipeline_runs: Arc<dyn PipelineRunClient>,
        config: Arc<OperatorConfig>,
    ) -> Self {
        Self {
            namespaces,
            secrets,
            cluster,
            pipeline_runs,
            config,
        }
    }

    /// Populate the created run namespace: secrets, service account,
    /// role binding, task run.
    async fn populate(
        &self,
        pipeline_run: &PipelineRun,
        run_namespace: &str,
    ) -> OperatorResult<()> {
        self.copy_secrets(pipeline_run, run_namespace)
            .await
            .map_err(|err| OperatorError::context("failed to copy secrets", err))?;

        let account = build_service_account(
            run_namespace,
            &self.config.scm_clone_secret,
            &self.config.image_pull_secret,
        );
        self.cluster
            .create_service_account(run_namespace, &account)
            .await
            .map_err(|err| OperatorError::context("failed to create service account", err))?;

        let binding = build_role_binding(run_namespace, &self.config.run_cluster_role);
        self.cluster
            .create_role_binding(run_namespace, &binding)
            .await
            .map_err(|err| OperatorError::context("failed to create role binding", err))?;

        let task_run = build_task_run(
            &pipeline_run.key(),
            &pipeline_run.spec,
            run_namespace,
            self.config.default_build_timeout_seconds,
        )?;
        self.cluster
            .create_task_run(run_namespace, &task_run)
            .await
            .map_err(|err| OperatorError::context("failed to create task run", err))?;

        Ok(())
    }

    /// Copy the requested secrets plus the configured SCM clone and
    /// image pull secrets into the run namespace.
    ///
    /// A provider miss aborts the copy; a create failure for an
    /// individual secret is logged and the loop continues.
    async fn copy_secrets(
        &self,
        pipeline_run: &PipelineRun,
        run_namespace: &str,
    ) -> OperatorResult<()> {
        let source_namespace = pipeline_run.namespace().unwrap_or_default();
        let mut names: Vec<&str> = pipeline_run
            .spec
            .secrets
            .iter()
            .map(String::as_str)
            .collect();
        if !self.config.scm_clone_secret.is_empty() {
            names.push(&self.config.scm_clone_secret);
        }
        if !self.config.image_pull_secret.is_empty() {
            names.push(&self.config.image_pull_secret);
        }

        for name in names {
            let secret = self.secrets.get_secret(&source_namespace, name).await?;
            let copy = copy_of(&secret, name, run_namespace);
            if let Err(err) = self.cluster.create_secret(run_namespace, &copy).await {
                tracing::warn!(
                    secret = %name,
                    namespace = %run_namespace,
                    error = %err,
                    "Cannot create secret copy"
                );
            } else {
                tracing::debug!(secret = %name, namespace = %run_namespace, "Copied secret");
            }
        }
        Ok(())
    }
}

#[async_trait]
impl RunManagement for RunManager {
    async fn start(
        &self,
        pipeline_run: &PipelineRun,
        status: &mut PipelineRunStatus,
    ) -> OperatorResult<()> {
        let run_namespace = self
            .namespaces
            .create("", &BTreeMap::new())
            .await
            .map_err(|err| OperatorError::context("failed to create run namespace", err))?;

        status.run_namespace = run_namespace.clone();
        self.pipeline_runs.patch_status(pipeline_run, status).await?;

        if let Err(err) = self.populate(pipeline_run, &run_namespace).await {
            if is_content_error(&err) {
                status.set_result(RunResult::ErrorContent);
            }
            if let Err(cleanup_err) = self.cleanup(status).await {
                tracing::warn!(
                    namespace = %run_namespace,
                    error = %cleanup_err,
                    "Rollback cleanup failed; will be retried from the recorded namespace"
                );
            }
            return Err(err);
        }

        tracing::info!(
            pipeline_run = %pipeline_run.key(),
            namespace = %run_namespace,
            "Run environment prepared"
        );
        Ok(())
    }

    async fn get_run(&self, status: &PipelineRunStatus) -> OperatorResult<RunView> {
        let namespace = &status.run_namespace;
        match self.cluster.get_task_run(namespace, TASK_RUN_NAME).await? {
            Some(task_run) => Ok(RunView::new(task_run)),
            None => Err(OperatorError::MissingTaskRun {
                name: TASK_RUN_NAME.to_string(),
                namespace: namespace.clone(),
            }),
        }
    }

    async fn cleanup(&self, status: &mut PipelineRunStatus) -> OperatorResult<()> {
        if status.run_namespace.is_empty() {
            status.set_message("Nothing to clean up as namespace not set");
            return Ok(());
        }

        match self.namespaces.delete(&status.run_namespace).await {
            Ok(()) => {
                status.finish_current_state(Utc::now());
                Ok(())
            }
            Err(err) => {
                status.store_error_as_message(&err, "error deleting namespace");
                Err(err)
            }
        }
    }
}

/// Whether an error is caused by the pipeline run's own content
/// rather than the infrastructure.
fn is_content_error(error: &OperatorError) -> bool {
    match error {
        OperatorError::MissingSecret { .. } | OperatorError::Serialization(_) => true,
        OperatorError::Context { source, .. } => is_content_error(source),
        _ => false,
    }
}
