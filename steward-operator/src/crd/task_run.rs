//! Tekton TaskRun modelled as a foreign custom resource.
//!
//! The operator creates exactly one TaskRun per PipelineRun inside
//! the run namespace and observes its lifecycle. Only the fields this
//! operator reads or writes are modelled.

use k8s_openapi::api::core::v1::ContainerState;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition type reported by Tekton when a task run completes.
pub const CONDITION_SUCCEEDED: &str = "Succeeded";

/// Condition reason reported by Tekton when a task run exceeds its
/// timeout.
pub const REASON_TIMEOUT: &str = "TaskRunTimeout";

/// TaskRun is the execution resource managed by the external task
/// runner.
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "tekton.dev",
    version = "v1alpha1",
    kind = "TaskRun",
    plural = "taskruns",
    namespaced,
    status = "TaskRunStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct TaskRunSpec {
    /// Service account the task pods run as.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub service_account_name: String,

    /// Reference to the task template to execute.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_ref: Option<TaskRef>,

    /// Parameters passed to the task, in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<Param>,

    /// Execution timeout, e.g. `"3600s"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
}

/// Reference to a task template.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TaskRef {
    /// Template kind, e.g. `ClusterTask`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    /// Template name.
    pub name: String,
}

/// A single string parameter of a task run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Param {
    /// Parameter name.
    pub name: String,
    /// Parameter value.
    pub value: String,
}

impl Param {
    /// Convenience constructor.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Status reported by the task runner.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TaskRunStatus {
    /// When the task pod started executing (RFC 3339).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,

    /// When the task run completed (RFC 3339).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<String>,

    /// Conditions describing the task run, notably `Succeeded`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<RunCondition>,

    /// Per-step container states.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<StepState>,
}

impl TaskRunStatus {
    /// The `Succeeded` condition, if reported yet.
    pub fn succeeded_condition(&self) -> Option<&RunCondition> {
        self.conditions
            .iter()
            .find(|c| c.condition_type == CONDITION_SUCCEEDED)
    }
}

/// A condition reported on a task run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RunCondition {
    /// Type of condition, e.g. `Succeeded`.
    #[serde(rename = "type")]
    pub condition_type: String,

    /// Status of the condition: `True`, `False` or `Unknown`.
    pub status: String,

    /// Machine-readable reason for the condition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Human-readable message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// State of one step container of a task run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StepState {
    /// Step name as declared in the task template.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    /// Container state of the step.
    #[serde(flatten)]
    pub container: ContainerState,
}
