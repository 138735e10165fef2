//! Pipeline run lookup.

use async_trait::async_trait;
use kube::{Api, Client};

use crate::crd::PipelineRun;
use crate::error::OperatorResult;

/// Contract for by-key lookup of pipeline runs.
///
/// A `None` result means the resource does not exist, which is a
/// successful no-op for the reconciler.
#[async_trait]
pub trait PipelineRunFetcher: Send + Sync {
    /// Look up a pipeline run by namespace and name.
    async fn by_key(&self, namespace: &str, name: &str) -> OperatorResult<Option<PipelineRun>>;
}

/// Fetcher reading through the API server.
#[derive(Clone)]
pub struct KubePipelineRunFetcher {
    client: Client,
}

impl KubePipelineRunFetcher {
    /// Create a new fetcher.
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PipelineRunFetcher for KubePipelineRunFetcher {
    async fn by_key(&self, namespace: &str, name: &str) -> OperatorResult<Option<PipelineRun>> {
        let api: Api<PipelineRun> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }
}
