//! Pipeline run status and finalizer updates.

use async_trait::async_trait;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client, ResourceExt};

use crate::crd::{PipelineRun, PipelineRunStatus, FINALIZER};
use crate::error::{OperatorError, OperatorResult};

/// Contract for persisting controller-owned changes to a pipeline
/// run.
#[async_trait]
pub trait PipelineRunClient: Send + Sync {
    /// Replace the status block with `status`.
    async fn patch_status(
        &self,
        pipeline_run: &PipelineRun,
        status: &PipelineRunStatus,
    ) -> OperatorResult<()>;

    /// Add the controller finalizer if it is missing.
    async fn ensure_finalizer(&self, pipeline_run: &PipelineRun) -> OperatorResult<()>;

    /// Remove the controller finalizer if present.
    async fn remove_finalizer(&self, pipeline_run: &PipelineRun) -> OperatorResult<()>;
}

/// Client writing through the API server.
#[derive(Clone)]
pub struct KubePipelineRunClient {
    client: Client,
}

impl KubePipelineRunClient {
    /// Create a new client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api_for(&self, pipeline_run: &PipelineRun) -> OperatorResult<Api<PipelineRun>> {
        let namespace = pipeline_run.namespace().ok_or_else(|| {
            OperatorError::InvalidConfig("PipelineRun must be namespaced".into())
        })?;
        Ok(Api::namespaced(self.client.clone(), &namespace))
    }
}

#[async_trait]
impl PipelineRunClient for KubePipelineRunClient {
    async fn patch_status(
        &self,
        pipeline_run: &PipelineRun,
        status: &PipelineRunStatus,
    ) -> OperatorResult<()> {
        let api = self.api_for(pipeline_run)?;
        let patch = serde_json::json!({ "status": status });
        api.patch_status(
            &pipeline_run.name_any(),
            &PatchParams::default(),
            &Patch::Merge(&patch),
        )
        .await?;
        Ok(())
    }

    async fn ensure_finalizer(&self, pipeline_run: &PipelineRun) -> OperatorResult<()> {
        if pipeline_run.finalizers().iter().any(|f| f == FINALIZER) {
            return Ok(());
        }

        let mut finalizers = pipeline_run.finalizers().to_vec();
        finalizers.push(FINALIZER.to_string());
        self.patch_finalizers(pipeline_run, finalizers).await
    }

    async fn remove_finalizer(&self, pipeline_run: &PipelineRun) -> OperatorResult<()> {
        if !pipeline_run.finalizers().iter().any(|f| f == FINALIZER) {
            return Ok(());
        }

        let finalizers: Vec<String> = pipeline_run
            .finalizers()
            .iter()
            .filter(|f| *f != FINALIZER)
            .cloned()
            .collect();
        self.patch_finalizers(pipeline_run, finalizers).await
    }
}

impl KubePipelineRunClient {
    async fn patch_finalizers(
        &self,
        pipeline_run: &PipelineRun,
        finalizers: Vec<String>,
    ) -> OperatorResult<()> {
        let api = self.api_for(pipeline_run)?;
        let patch = serde_json::json!({ "metadata": { "finalizers": finalizers } });
        api.patch(
            &pipeline_run.name_any(),
            &PatchParams::default(),
            &Patch::Merge(&patch),
        )
        .await?;
        Ok(())
    }
}
