//! Per-key reconciliation of pipeline runs.
//!
//! Each pass performs one transition of the run state machine. The
//! decisions are pure functions over the observed status and the
//! backing run, so they are unit-testable without fakes; the
//! surrounding methods apply the effects and persist the status.

use chrono::Utc;
use std::sync::Arc;

use crate::crd::{Intent, PipelineRun, PipelineRunStatus, RunResult, State};
use crate::error::OperatorResult;
use crate::k8s::{PipelineRunClient, PipelineRunFetcher};
use crate::metrics::Metrics;
use crate::run::RunManagement;

use super::ReconcileAction;

/// Message recorded when a run is killed before completion.
pub const MESSAGE_KILLED: &str = "Killed by user";

/// Message recorded when a kill arrives after completion.
pub const MESSAGE_CANNOT_KILL: &str = "Cannot kill completed pipeline run";

/// Message recorded when a crashed preparation is recovered.
const MESSAGE_PREPARATION_INTERRUPTED: &str = "pipeline run preparation was interrupted";

/// Reconciles pipeline runs through the collaborator contracts.
pub struct Reconciler {
    fetcher: Arc<dyn PipelineRunFetcher>,
    pipeline_runs: Arc<dyn PipelineRunClient>,
    runs: Arc<dyn RunManagement>,
    metrics: Arc<dyn Metrics>,
}

impl Reconciler {
    /// Create a new reconciler.
    pub fn new(
        fetcher: Arc<dyn PipelineRunFetcher>,
        pipeline_runs: Arc<dyn PipelineRunClient>,
        runs: Arc<dyn RunManagement>,
        metrics: Arc<dyn Metrics>,
    ) -> Self {
        Self {
            fetcher,
            pipeline_runs,
            runs,
            metrics,
        }
    }

    /// Run one reconcile pass for the pipeline run behind `key`.
    ///
    /// A missing resource is a successful no-op. Errors returned from
    /// here are transient; the caller requeues the key with backoff.
    pub async fn reconcile(&self, namespace: &str, name: &str) -> OperatorResult<ReconcileAction> {
        let pipeline_run = match self.fetcher.by_key(namespace, name).await? {
            Some(pipeline_run) => pipeline_run,
            None => return Ok(ReconcileAction::Done),
        };
        let mut status = pipeline_run.status.clone().unwrap_or_default();

        tracing::debug!(
            pipeline_run = %pipeline_run.key(),
            state = %status.state,
            "Reconciling PipelineRun"
        );

        if pipeline_run.metadata.deletion_timestamp.is_some() {
            return self.handle_deletion(&pipeline_run, &mut status).await;
        }
        self.pipeline_runs.ensure_finalizer(&pipeline_run).await?;

        if pipeline_run.spec.intent == Intent::Kill {
            return self.handle_kill(&pipeline_run, &mut status).await;
        }

        match status.state {
            State::Undefined | State::Preparing => self.handle_new(&pipeline_run, &mut status).await,
            State::Waiting => self.handle_waiting(&pipeline_run, &mut status).await,
            State::Running => self.handle_running(&pipeline_run, &mut status).await,
            State::Cleaning => self.handle_cleaning(&pipeline_run, &mut status).await,
            State::Finished => Ok(ReconcileAction::Done),
        }
    }

    /// The user requested deletion: clean up, then release the
    /// resource by removing the finalizer.
    async fn handle_deletion(
        &self,
        pipeline_run: &PipelineRun,
        status: &mut PipelineRunStatus,
    ) -> OperatorResult<ReconcileAction> {
        match self.runs.cleanup(status).await {
            Ok(()) => {
                self.pipeline_runs.patch_status(pipeline_run, status).await?;
                self.pipeline_runs.remove_finalizer(pipeline_run).await?;
                tracing::info!(pipeline_run = %pipeline_run.key(), "Released deleted PipelineRun");
                Ok(ReconcileAction::Done)
            }
            Err(err) => {
                self.pipeline_runs.patch_status(pipeline_run, status).await?;
                Err(err)
            }
        }
    }

    /// The user asked to kill the run. Every branch ends the pass.
    async fn handle_kill(
        &self,
        pipeline_run: &PipelineRun,
        status: &mut PipelineRunStatus,
    ) -> OperatorResult<ReconcileAction> {
        match kill_step(status) {
            KillStep::MarkKilled => {
                status.set_message(MESSAGE_KILLED);
                status.set_result(RunResult::Killed);
                self.change_state(status, State::Cleaning);
                self.pipeline_runs.patch_status(pipeline_run, status).await?;
                Ok(ReconcileAction::Done)
            }
            KillStep::AlreadyKilled => Ok(ReconcileAction::Done),
            KillStep::NormalizeMessage => {
                status.set_message(MESSAGE_CANNOT_KILL);
                self.pipeline_runs.patch_status(pipeline_run, status).await?;
                Ok(ReconcileAction::Done)
            }
            KillStep::Settled => Ok(ReconcileAction::Done),
        }
    }

    /// Initial transition: prepare the run environment and launch the
    /// task run.
    ///
    /// A run observed in `preparing` was interrupted by a controller
    /// restart. Without a recorded namespace the preparation simply
    /// restarts; with one, the half-built environment is rolled back
    /// through the cleaning state so a run never owns two namespaces.
    async fn handle_new(
        &self,
        pipeline_run: &PipelineRun,
        status: &mut PipelineRunStatus,
    ) -> OperatorResult<ReconcileAction> {
        if status.state == State::Preparing && !status.run_namespace.is_empty() {
            status.set_result(RunResult::ErrorInfra);
            status.set_message(MESSAGE_PREPARATION_INTERRUPTED);
            self.change_state(status, State::Cleaning);
            self.pipeline_runs.patch_status(pipeline_run, status).await?;
            return Ok(ReconcileAction::requeue_short());
        }

        self.change_state(status, State::Preparing);
        self.pipeline_runs.patch_status(pipeline_run, status).await?;

        match self.runs.start(pipeline_run, status).await {
            Err(err) => {
                status.store_error_as_message(&err, "error syncing resource");
                self.change_state(status, State::Cleaning);
                self.pipeline_runs.patch_status(pipeline_run, status).await?;
                // The error is swallowed so the key is not
                // rate-limited; the next pass performs cleanup.
                Ok(ReconcileAction::requeue_short())
            }
            Ok(()) => {
                self.metrics.count_start();
                self.change_state(status, State::Waiting);
                self.pipeline_runs.patch_status(pipeline_run, status).await?;
                Ok(ReconcileAction::requeue_short())
            }
        }
    }

    /// Wait for the task run to start executing.
    async fn handle_waiting(
        &self,
        pipeline_run: &PipelineRun,
        status: &mut PipelineRunStatus,
    ) -> OperatorResult<ReconcileAction> {
        match self.runs.get_run(status).await {
            Err(err) => {
                status.store_error_as_message(&err, "error syncing resource");
                self.change_state(status, State::Cleaning);
                self.pipeline_runs.patch_status(pipeline_run, status).await?;
                Ok(ReconcileAction::requeue_short())
            }
            Ok(run) => {
                if run.start_time().is_some() {
                    self.change_state(status, State::Running);
                    self.pipeline_runs.patch_status(pipeline_run, status).await?;
                }
                Ok(ReconcileAction::requeue_short())
            }
        }
    }

    /// Track the executing task run until it finishes.
    async fn handle_running(
        &self,
        pipeline_run: &PipelineRun,
        status: &mut PipelineRunStatus,
    ) -> OperatorResult<ReconcileAction> {
        match self.runs.get_run(status).await {
            Err(err) => {
                status.store_error_as_message(&err, "error syncing resource");
                self.change_state(status, State::Cleaning);
                self.pipeline_runs.patch_status(pipeline_run, status).await?;
                Ok(ReconcileAction::requeue_short())
            }
            Ok(run) => {
                status.container = run.container_info().cloned();
                let (finished, result) = run.is_finished();
                if finished {
                    status.set_message(run.completion_message());
                    status.set_result(result);
                    self.change_state(status, State::Cleaning);
                    self.metrics.count_result(result);
                }
                self.pipeline_runs.patch_status(pipeline_run, status).await?;
                Ok(ReconcileAction::requeue_short())
            }
        }
    }

    /// Tear down the run environment.
    async fn handle_cleaning(
        &self,
        pipeline_run: &PipelineRun,
        status: &mut PipelineRunStatus,
    ) -> OperatorResult<ReconcileAction> {
        match self.runs.cleanup(status).await {
            Ok(()) => {
                self.change_state(status, State::Finished);
                self.pipeline_runs.patch_status(pipeline_run, status).await?;
                Ok(ReconcileAction::Done)
            }
            Err(err) => {
                self.pipeline_runs.patch_status(pipeline_run, status).await?;
                // Surfaced so the key is retried with backoff.
                Err(err)
            }
        }
    }

    /// Transition into `state` and emit the duration metric for the
    /// state that was left.
    fn change_state(&self, status: &mut PipelineRunStatus, state: State) {
        if let Some(closed) = status.enter_state(state, Utc::now()) {
            if let Some(duration) = closed.duration() {
                self.metrics.observe_state_duration(closed.state, duration);
            }
        }
    }
}

/// What the kill override should do in the current pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum KillStep {
    /// Result undefined: mark killed and drive to cleaning.
    MarkKilled,
    /// Already killed: nothing left to do.
    AlreadyKilled,
    /// Completed with another result: record that killing is
    /// impossible.
    NormalizeMessage,
    /// Completed and the message is already recorded.
    Settled,
}

/// Pure kill decision over the observed status.
pub(crate) fn kill_step(status: &PipelineRunStatus) -> KillStep {
    match status.result {
        RunResult::Undefined => KillStep::MarkKilled,
        RunResult::Killed => KillStep::AlreadyKilled,
        _ if status.message != MESSAGE_CANNOT_KILL => KillStep::NormalizeMessage,
        _ => KillStep::Settled,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn undefined_result_is_marked_killed() {
        let status = PipelineRunStatus::default();
        assert_eq!(kill_step(&status), KillStep::MarkKilled);
    }

    #[test]
    fn killed_result_short_circuits() {
        let status = PipelineRunStatus {
            result: RunResult::Killed,
            ..Default::default()
        };
        assert_eq!(kill_step(&status), KillStep::AlreadyKilled);
    }

    #[test]
    fn completed_result_normalizes_message_once() {
        let mut status = PipelineRunStatus {
            result: RunResult::Success,
            ..Default::default()
        };
        assert_eq!(kill_step(&status), KillStep::NormalizeMessage);

        status.set_message(MESSAGE_CANNOT_KILL);
        assert_eq!(kill_step(&status), KillStep::Settled);
    }
}
