//! PipelineRun custom resource definition.
//!
//! A PipelineRun declares *what* should run: a pipeline reference,
//! parameters, secrets, an optional logging sink and the user's
//! intent. The operator owns the status block and drives it through
//! the run state machine.

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::ContainerState;
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// API group of all Steward resources.
pub const GROUP: &str = "steward.dev";

/// Finalizer that keeps a PipelineRun visible until its run
/// namespace has been cleaned up.
pub const FINALIZER: &str = "steward.dev/pipelinerun-controller";

/// Annotation on task runs carrying the `namespace/name` key of the
/// owning PipelineRun. The event router uses it for reverse lookup.
pub const ANNOTATION_PIPELINE_RUN_KEY: &str = "steward.dev/pipeline-run-key";

/// Annotation of a Steward client namespace defining the prefix of
/// tenant namespaces belonging to this client.
pub const ANNOTATION_TENANT_NAMESPACE_PREFIX: &str = "steward.dev/tenant-namespace-prefix";

/// Annotation of a Steward client namespace defining the number of
/// characters of the random tenant namespace name suffix.
pub const ANNOTATION_TENANT_NAMESPACE_SUFFIX_LENGTH: &str =
    "steward.dev/tenant-namespace-suffix-length";

/// Annotation of a Steward client namespace defining the cluster role
/// assigned to the default service account of a tenant namespace.
pub const ANNOTATION_TENANT_ROLE: &str = "steward.dev/tenant-role";

/// PipelineRun is the schema for the pipelineruns API.
///
/// The spec is user-owned and immutable from the operator's point of
/// view; the status is operator-owned.
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "steward.dev",
    version = "v1alpha1",
    kind = "PipelineRun",
    plural = "pipelineruns",
    shortname = "spr",
    namespaced,
    status = "PipelineRunStatus",
    printcolumn = r#"{"name":"State", "type":"string", "jsonPath":".status.state"}"#,
    printcolumn = r#"{"name":"Result", "type":"string", "jsonPath":".status.result"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRunSpec {
    /// Reference to the pipeline definition to execute.
    pub jenkins_file: JenkinsFile,

    /// Pipeline parameters, passed to the pipeline as a JSON object.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub args: BTreeMap<String, String>,

    /// Names of secrets to copy into the run namespace.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secrets: Vec<String>,

    /// User-expressed desire about the run.
    #[serde(default)]
    pub intent: Intent,

    /// Optional logging sink for the pipeline log.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logging: Option<Logging>,
}

/// Reference to a pipeline definition in an SCM repository.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct JenkinsFile {
    /// Clone URL of the repository.
    #[serde(rename = "repoUrl")]
    pub url: String,

    /// Revision (branch, tag or commit) to check out.
    pub revision: String,

    /// Path of the pipeline file inside the repository.
    #[serde(rename = "relativePath")]
    pub path: String,
}

/// User-expressed desire about a pipeline run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum Intent {
    /// Execute the pipeline (the default).
    #[default]
    #[serde(rename = "")]
    Run,
    /// Stop the pipeline and clean up.
    #[serde(rename = "kill")]
    Kill,
}

/// Logging sink configuration for a pipeline run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Logging {
    /// Elasticsearch sink. Currently the only supported variant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elasticsearch: Option<Elasticsearch>,
}

/// Elasticsearch logging sink.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct Elasticsearch {
    /// Opaque identifier attached to every log entry of this run.
    /// Any JSON value; passed through verbatim.
    #[serde(rename = "runID")]
    pub run_id: serde_json::Value,
}

/// Observed state of a pipeline run.
///
/// `Finished` is terminal; all other states may transition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum State {
    /// No state recorded yet.
    #[default]
    #[serde(rename = "")]
    Undefined,
    /// The run namespace and its content are being prepared.
    #[serde(rename = "preparing")]
    Preparing,
    /// The task run exists but has not started yet.
    #[serde(rename = "waiting")]
    Waiting,
    /// The pipeline is executing.
    #[serde(rename = "running")]
    Running,
    /// The run namespace is being torn down.
    #[serde(rename = "cleaning")]
    Cleaning,
    /// Everything is done; nothing remains to reconcile.
    #[serde(rename = "finished")]
    Finished,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            State::Undefined => "undefined",
            State::Preparing => "preparing",
            State::Waiting => "waiting",
            State::Running => "running",
            State::Cleaning => "cleaning",
            State::Finished => "finished",
        };
        f.write_str(s)
    }
}

/// Terminal outcome classifier of a pipeline run, orthogonal to the
/// state. Once set to a non-undefined value it is never overwritten.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum RunResult {
    /// No result recorded yet.
    #[default]
    #[serde(rename = "")]
    Undefined,
    /// The pipeline completed successfully.
    #[serde(rename = "success")]
    Success,
    /// The pipeline failed due to its own content, e.g. a missing
    /// secret or a failing build.
    #[serde(rename = "error_content")]
    ErrorContent,
    /// The pipeline failed due to an infrastructure problem.
    #[serde(rename = "error_infra")]
    ErrorInfra,
    /// The run was killed by the user.
    #[serde(rename = "killed")]
    Killed,
    /// The run exceeded the build timeout.
    #[serde(rename = "timeout")]
    Timeout,
}

impl fmt::Display for RunResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunResult::Undefined => "undefined",
            RunResult::Success => "success",
            RunResult::ErrorContent => "error_content",
            RunResult::ErrorInfra => "error_infra",
            RunResult::Killed => "killed",
            RunResult::Timeout => "timeout",
        };
        f.write_str(s)
    }
}

/// One entry of the state history: when a state was entered and left.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StateItem {
    /// The state this entry records.
    pub state: State,
    /// When the state was entered (RFC 3339).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    /// When the state was left (RFC 3339). `None` while current.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<String>,
}

impl StateItem {
    /// Time spent in this state, if both timestamps are recorded and
    /// parse as RFC 3339.
    pub fn duration(&self) -> Option<std::time::Duration> {
        let started = DateTime::parse_from_rfc3339(self.started_at.as_deref()?).ok()?;
        let finished = DateTime::parse_from_rfc3339(self.finished_at.as_deref()?).ok()?;
        (finished - started).to_std().ok()
    }
}

/// Operator-owned status of a pipeline run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRunStatus {
    /// Current state of the run.
    #[serde(default)]
    pub state: State,

    /// Terminal outcome, once known.
    #[serde(default)]
    pub result: RunResult,

    /// Latest human-readable message about the run.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,

    /// Snapshot of the runner container state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<ContainerState>,

    /// Name of the namespace holding this run's resources. Empty
    /// until preparation has created one.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub run_namespace: String,

    /// When the run left its initial state (RFC 3339).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,

    /// When the run reached the finished state (RFC 3339).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<String>,

    /// History of states with enter/leave timestamps.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub state_history: Vec<StateItem>,
}

impl PipelineRunStatus {
    /// Transition into `state` at time `now`.
    ///
    /// Closes the current state-history entry and opens a new one.
    /// Returns the closed entry so the caller can observe the time
    /// spent in the previous state.
    pub fn enter_state(&mut self, state: State, now: DateTime<Utc>) -> Option<StateItem> {
        let timestamp = now.to_rfc3339();

        let closed = match self.state_history.last_mut() {
            Some(current) if current.finished_at.is_none() => {
                current.finished_at = Some(timestamp.clone());
                Some(current.clone())
            }
            _ => None,
        };

        self.state_history.push(StateItem {
            state,
            started_at: Some(timestamp.clone()),
            finished_at: None,
        });
        self.state = state;

        if self.started_at.is_none() {
            self.started_at = Some(timestamp.clone());
        }
        if state == State::Finished {
            self.finished_at = Some(timestamp);
        }

        closed
    }

    /// Close the current state-history entry without entering a new
    /// state. Used when cleanup completes.
    pub fn finish_current_state(&mut self, now: DateTime<Utc>) {
        if let Some(current) = self.state_history.last_mut() {
            if current.finished_at.is_none() {
                current.finished_at = Some(now.to_rfc3339());
            }
        }
    }

    /// Record the terminal result. A no-op when a non-undefined
    /// result is already recorded.
    pub fn set_result(&mut self, result: RunResult) {
        if self.result == RunResult::Undefined {
            self.result = result;
        }
    }

    /// Record the latest message.
    pub fn set_message(&mut self, message: impl Into<String>) {
        self.message = message.into();
    }

    /// Record an error as the latest message, prefixed with the
    /// operation it occurred in when `context` is non-empty.
    pub fn store_error_as_message(&mut self, error: &impl fmt::Display, context: &str) {
        self.message = if context.is_empty() {
            error.to_string()
        } else {
            format!("{context}: {error}")
        };
    }
}

impl PipelineRun {
    /// The stable `namespace/name` key of this pipeline run.
    pub fn key(&self) -> String {
        super::format_key(
            self.namespace().unwrap_or_default().as_str(),
            self.name_any().as_str(),
        )
    }
}
