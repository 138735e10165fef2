//! Controller runtime wiring.
//!
//! Two watch streams feed the reconciler: PipelineRun events enqueue
//! the resource's own key; TaskRun events are mapped back to the
//! owning PipelineRun through the key annotation. Only object
//! references travel through the scheduler, so every pass re-reads
//! the current resource state and never acts on stale event payloads.
//!
//! The runtime serialises reconciles per key across the configured
//! number of workers and deduplicates keys enqueued while a pass for
//! them is in flight.

mod reconcile;

pub use reconcile::{Reconciler, MESSAGE_CANNOT_KILL, MESSAGE_KILLED};

use futures::StreamExt;
use kube::api::Api;
use kube::runtime::controller::{self, Action};
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher;
use kube::runtime::Controller;
use kube::{Client, ResourceExt};
use std::sync::Arc;
use std::time::Duration;

use crate::config::OperatorConfig;
use crate::crd::{parse_key, PipelineRun, TaskRun, ANNOTATION_PIPELINE_RUN_KEY};
use crate::error::{OperatorError, OperatorResult};
use crate::k8s::{
    KubePipelineRunClient, KubePipelineRunFetcher, KubeRunNamespaceClient, KubeSecretProvider,
    NamespaceManager,
};
use crate::metrics::Metrics;
use crate::run::RunManager;

/// Result of a reconcile pass.
#[derive(Debug)]
pub enum ReconcileAction {
    /// Requeue after the specified duration.
    Requeue(Duration),
    /// Wait for the next watch event.
    Done,
}

impl ReconcileAction {
    /// Requeue after 5 seconds, used as a safety net while a run is
    /// in flight.
    pub fn requeue_short() -> Self {
        Self::Requeue(Duration::from_secs(5))
    }
}

/// Map a task run event to the owning pipeline run.
///
/// The owner is referenced by the key annotation, never by pointer;
/// that stable string is what makes recovery after a controller
/// restart possible. Missing or malformed annotations yield nothing.
fn owning_pipeline_run(task_run: TaskRun) -> Option<ObjectRef<PipelineRun>> {
    let key = task_run.annotations().get(ANNOTATION_PIPELINE_RUN_KEY)?;
    let (namespace, name) = parse_key(key)?;
    Some(ObjectRef::new(name).within(namespace))
}

/// Run the PipelineRun controller until the shutdown signal fires.
pub async fn run(
    client: Client,
    config: OperatorConfig,
    metrics: Arc<dyn Metrics>,
) -> OperatorResult<()> {
    let config = Arc::new(config);

    let pipeline_runs: Api<PipelineRun> = Api::all(client.clone());
    let task_runs: Api<TaskRun> = Api::all(client.clone());

    let pipeline_run_client = Arc::new(KubePipelineRunClient::new(client.clone()));
    let namespace_manager = Arc::new(NamespaceManager::new(
        client.clone(),
        config.run_namespace_prefix.clone(),
        config.run_namespace_suffix_length,
    ));
    let run_manager = Arc::new(RunManager::new(
        namespace_manager,
        Arc::new(KubeSecretProvider::new(client.clone())),
        Arc::new(KubeRunNamespaceClient::new(client.clone())),
        pipeline_run_client.clone(),
        config.clone(),
    ));
    let reconciler = Arc::new(Reconciler::new(
        Arc::new(KubePipelineRunFetcher::new(client.clone())),
        pipeline_run_client,
        run_manager,
        metrics,
    ));

    tracing::info!(workers = config.workers, "Starting PipelineRun controller");

    Controller::new(pipeline_runs, watcher::Config::default())
        .with_config(controller::Config::default().concurrency(config.workers))
        .watches(task_runs, watcher::Config::default(), owning_pipeline_run)
        .shutdown_on_signal()
        .run(
            |pipeline_run, reconciler| async move {
                let namespace = pipeline_run.namespace().unwrap_or_default();
                let name = pipeline_run.name_any();
                match reconciler.reconcile(&namespace, &name).await? {
                    ReconcileAction::Requeue(duration) => Ok(Action::requeue(duration)),
                    ReconcileAction::Done => Ok(Action::await_change()),
                }
            },
            error_policy,
            reconciler,
        )
        .for_each(|result| async move {
            match result {
                Ok((object, _action)) => {
                    tracing::debug!(pipeline_run = %object.name, "Reconciled PipelineRun");
                }
                Err(err) => {
                    tracing::error!(error = %err, "PipelineRun controller stream error");
                }
            }
        })
        .await;

    tracing::info!("PipelineRun controller stopped");
    Ok(())
}

/// Requeue failed keys with backoff.
fn error_policy(
    pipeline_run: Arc<PipelineRun>,
    error: &OperatorError,
    _reconciler: Arc<Reconciler>,
) -> Action {
    tracing::error!(
        pipeline_run = %pipeline_run.key(),
        error = %error,
        "Reconciliation error"
    );
    Action::requeue(Duration::from_secs(30))
}
