//! Cluster-facing collaborators.
//!
//! The reconciliation core depends on the contracts defined here
//! (traits), not on concrete clients, so scenario tests can run
//! against in-memory fakes. The `Kube*` types are the thin client
//! implementations used in production.

mod cluster;
mod fetcher;
mod namespace;
mod pipeline_run;
mod secrets;

pub use cluster::{KubeRunNamespaceClient, RunNamespaceClient};
pub use fetcher::{KubePipelineRunFetcher, PipelineRunFetcher};
pub use namespace::{NamespaceManagement, NamespaceManager};
pub use pipeline_run::{KubePipelineRunClient, PipelineRunClient};
pub use secrets::{copy_of, KubeSecretProvider, SecretProvider};
