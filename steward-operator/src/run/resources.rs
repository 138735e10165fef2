//! Builders for the resources created in each run namespace.

use k8s_openapi::api::core::v1::{LocalObjectReference, ObjectReference, ServiceAccount};
use k8s_openapi::api::rbac::v1::{RoleBinding, RoleRef, Subject};
use kube::api::ObjectMeta;

use crate::crd::{Param, PipelineRunSpec, TaskRef, TaskRun, TaskRunSpec, ANNOTATION_PIPELINE_RUN_KEY};
use crate::error::OperatorResult;

/// Service account the task pods run as.
pub const SERVICE_ACCOUNT_NAME: &str = "run-bot";

/// Name of the task run created in each run namespace.
pub const TASK_RUN_NAME: &str = "steward-jenkinsfile-runner";

/// Name of the cluster task template executing the Jenkinsfile
/// runner.
pub const CLUSTER_TASK_NAME: &str = "steward-jenkinsfile-runner";

/// Name of the step in the task run that executes the Jenkinsfile
/// runner.
pub const JENKINSFILE_RUNNER_STEP: &str = "jenkinsfile-runner";

const CLUSTER_TASK_KIND: &str = "ClusterTask";

/// Build the `run-bot` service account referencing the configured
/// SCM clone and image pull secrets (empty names are skipped).
pub fn build_service_account(
    namespace: &str,
    scm_clone_secret: &str,
    image_pull_secret: &str,
) -> ServiceAccount {
    ServiceAccount {
        metadata: ObjectMeta {
            name: Some(SERVICE_ACCOUNT_NAME.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        secrets: (!scm_clone_secret.is_empty()).then(|| {
            vec![ObjectReference {
                name: Some(scm_clone_secret.to_string()),
                ..Default::default()
            }]
        }),
        image_pull_secrets: (!image_pull_secret.is_empty()).then(|| {
            vec![LocalObjectReference {
                name: Some(image_pull_secret.to_string()),
            }]
        }),
        ..Default::default()
    }
}

/// Build the role binding attaching `cluster_role` to the `run-bot`
/// service account, scoped to the run namespace.
pub fn build_role_binding(namespace: &str, cluster_role: &str) -> RoleBinding {
    RoleBinding {
        metadata: ObjectMeta {
            name: Some(SERVICE_ACCOUNT_NAME.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "ClusterRole".to_string(),
            name: cluster_role.to_string(),
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name: SERVICE_ACCOUNT_NAME.to_string(),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        }]),
    }
}

/// Build the task run executing a pipeline run.
///
/// Parameters are assembled in a fixed order: the run namespace, the
/// pipeline reference, the JSON-serialised parameter map, then
/// exactly one logging parameter. Without a configured sink the
/// Elasticsearch index URL is overridden with the empty string, which
/// disables the template's default logging destination.
pub fn build_task_run(
    pipeline_run_key: &str,
    spec: &PipelineRunSpec,
    run_namespace: &str,
    timeout_seconds: u64,
) -> OperatorResult<TaskRun> {
    let mut params = vec![
        Param::new("RUN_NAMESPACE", run_namespace),
        Param::new("PIPELINE_GIT_URL", &spec.jenkins_file.url),
        Param::new("PIPELINE_GIT_REVISION", &spec.jenkins_file.revision),
        Param::new("PIPELINE_FILE", &spec.jenkins_file.path),
        Param::new("PIPELINE_PARAMS_JSON", serde_json::to_string(&spec.args)?),
    ];

    match spec.logging.as_ref().and_then(|l| l.elasticsearch.as_ref()) {
        None => params.push(Param::new("PIPELINE_LOG_ELASTICSEARCH_INDEX_URL", "")),
        Some(elasticsearch) => params.push(Param::new(
            "PIPELINE_LOG_ELASTICSEARCH_RUN_ID_JSON",
            serde_json::to_string(&elasticsearch.run_id)?,
        )),
    }

    let mut task_run = TaskRun::new(
        TASK_RUN_NAME,
        TaskRunSpec {
            service_account_name: SERVICE_ACCOUNT_NAME.to_string(),
            task_ref: Some(TaskRef {
                kind: CLUSTER_TASK_KIND.to_string(),
                name: CLUSTER_TASK_NAME.to_string(),
            }),
            params,
            timeout: Some(format!("{timeout_seconds}s")),
        },
    );
    task_run.metadata.namespace = Some(run_namespace.to_string());
    task_run.metadata.annotations = Some(
        [(
            ANNOTATION_PIPELINE_RUN_KEY.to_string(),
            pipeline_run_key.to_string(),
        )]
        .into(),
    );

    Ok(task_run)
}
