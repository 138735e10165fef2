//! Read-only view over a fetched task run.

use k8s_openapi::api::core::v1::ContainerState;

use crate::crd::{RunCondition, RunResult, TaskRun, REASON_TIMEOUT};

use super::JENKINSFILE_RUNNER_STEP;

/// Read-only view exposing what the reconciler needs to know about a
/// task run.
#[derive(Debug, Clone)]
pub struct RunView {
    task_run: TaskRun,
}

impl RunView {
    /// Wrap a fetched task run.
    pub fn new(task_run: TaskRun) -> Self {
        Self { task_run }
    }

    /// When the task pod started executing, if it has.
    pub fn start_time(&self) -> Option<&str> {
        self.task_run.status.as_ref()?.start_time.as_deref()
    }

    /// Container state of the Jenkinsfile runner step. Falls back to
    /// the first step when the well-known step name is absent.
    pub fn container_info(&self) -> Option<&ContainerState> {
        let steps = &self.task_run.status.as_ref()?.steps;
        steps
            .iter()
            .find(|step| step.name == JENKINSFILE_RUNNER_STEP)
            .or_else(|| steps.first())
            .map(|step| &step.container)
    }

    /// The `Succeeded` condition, if reported yet.
    pub fn succeeded_condition(&self) -> Option<&RunCondition> {
        self.task_run.status.as_ref()?.succeeded_condition()
    }

    /// Whether the run has finished, and with which result.
    ///
    /// An absent or `Unknown` condition means the run is still in
    /// progress; the result is undefined in that case.
    pub fn is_finished(&self) -> (bool, RunResult) {
        let condition = match self.succeeded_condition() {
            Some(condition) => condition,
            None => return (false, RunResult::Undefined),
        };
        match condition.status.as_str() {
            "True" => (true, RunResult::Success),
            "False" => {
                if condition.reason.as_deref() == Some(REASON_TIMEOUT) {
                    (true, RunResult::Timeout)
                } else {
                    (true, RunResult::ErrorContent)
                }
            }
            _ => (false, RunResult::Undefined),
        }
    }

    /// The message describing how the run completed: the terminated
    /// container's message when present, the succeeded condition's
    /// message otherwise.
    pub fn completion_message(&self) -> String {
        let container_message = self
            .container_info()
            .and_then(|container| container.terminated.as_ref())
            .and_then(|terminated| terminated.message.clone())
            .filter(|message| !message.is_empty());

        container_message
            .or_else(|| self.succeeded_condition().and_then(|c| c.message.clone()))
            .unwrap_or_default()
    }
}
