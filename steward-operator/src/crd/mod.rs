//! Custom resource definitions for the Steward operator.
//!
//! This module defines the resources the operator works with:
//!
//! - [`PipelineRun`]: the user-facing resource reconciled by the
//!   operator; one logical CI execution.
//! - [`TaskRun`]: the Tekton execution resource created inside each
//!   run namespace, modelled as a foreign custom resource.

mod pipeline_run;
mod task_run;

pub use pipeline_run::{
    Elasticsearch, Intent, JenkinsFile, Logging, PipelineRun, PipelineRunSpec, PipelineRunStatus,
    RunResult, State, StateItem, ANNOTATION_PIPELINE_RUN_KEY, ANNOTATION_TENANT_NAMESPACE_PREFIX,
    ANNOTATION_TENANT_NAMESPACE_SUFFIX_LENGTH, ANNOTATION_TENANT_ROLE, FINALIZER, GROUP,
};
pub use task_run::{
    Param, RunCondition, StepState, TaskRef, TaskRun, TaskRunSpec, TaskRunStatus,
    CONDITION_SUCCEEDED, REASON_TIMEOUT,
};

/// Format the stable `namespace/name` key of a namespaced object.
pub fn format_key(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}

/// Split a `namespace/name` key into its parts.
///
/// Returns `None` when the key does not have exactly two non-empty
/// segments.
pub fn parse_key(key: &str) -> Option<(&str, &str)> {
    let (namespace, name) = key.split_once('/')?;
    if namespace.is_empty() || name.is_empty() || name.contains('/') {
        return None;
    }
    Some((namespace, name))
}
