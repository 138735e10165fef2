//! Lifecycle scenarios driving the real reconciler and run manager
//! against an in-memory cluster.

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::api::core::v1::{ContainerState, ContainerStateTerminated, Secret, ServiceAccount};
use k8s_openapi::api::rbac::v1::RoleBinding;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use steward_operator::config::OperatorConfig;
use steward_operator::controller::{Reconciler, MESSAGE_CANNOT_KILL, MESSAGE_KILLED};
use steward_operator::crd::{
    Intent, JenkinsFile, PipelineRun, PipelineRunSpec, PipelineRunStatus, RunCondition, RunResult,
    State, StepState, TaskRun, CONDITION_SUCCEEDED, FINALIZER,
};
use steward_operator::error::{OperatorError, OperatorResult};
use steward_operator::k8s::{
    NamespaceManagement, PipelineRunClient, PipelineRunFetcher, RunNamespaceClient, SecretProvider,
};
use steward_operator::metrics::Metrics;
use steward_operator::run::{RunManager, JENKINSFILE_RUNNER_STEP, TASK_RUN_NAME};

/// Shared in-memory cluster state behind the collaborator fakes.
#[derive(Default)]
struct ClusterState {
    pipeline_run: Mutex<Option<PipelineRun>>,
    status_patches: AtomicUsize,
    namespace_counter: AtomicUsize,
    namespaces: Mutex<BTreeSet<String>>,
    created_namespaces: Mutex<Vec<String>>,
    source_secrets: Mutex<BTreeMap<String, Secret>>,
    copied_secrets: Mutex<Vec<String>>,
    task_run: Mutex<Option<TaskRun>>,
    fail_role_binding: AtomicBool,
    fail_secret_create: AtomicBool,
}

struct FakeFetcher(Arc<ClusterState>);

#[async_trait]
impl PipelineRunFetcher for FakeFetcher {
    async fn by_key(&self, namespace: &str, name: &str) -> OperatorResult<Option<PipelineRun>> {
        let guard = self.0.pipeline_run.lock();
        Ok(guard.as_ref().cloned().filter(|pr| {
            pr.metadata.namespace.as_deref() == Some(namespace)
                && pr.metadata.name.as_deref() == Some(name)
        }))
    }
}

struct FakePipelineRunClient(Arc<ClusterState>);

#[async_trait]
impl PipelineRunClient for FakePipelineRunClient {
    async fn patch_status(
        &self,
        _pipeline_run: &PipelineRun,
        status: &PipelineRunStatus,
    ) -> OperatorResult<()> {
        let mut guard = self.0.pipeline_run.lock();
        if let Some(pr) = guard.as_mut() {
            pr.status = Some(status.clone());
        }
        self.0.status_patches.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn ensure_finalizer(&self, _pipeline_run: &PipelineRun) -> OperatorResult<()> {
        let mut guard = self.0.pipeline_run.lock();
        if let Some(pr) = guard.as_mut() {
            let finalizers = pr.metadata.finalizers.get_or_insert_with(Vec::new);
            if !finalizers.iter().any(|f| f == FINALIZER) {
                finalizers.push(FINALIZER.to_string());
            }
        }
        Ok(())
    }

    async fn remove_finalizer(&self, _pipeline_run: &PipelineRun) -> OperatorResult<()> {
        let mut guard = self.0.pipeline_run.lock();
        if let Some(pr) = guard.as_mut() {
            if let Some(finalizers) = pr.metadata.finalizers.as_mut() {
                finalizers.retain(|f| f != FINALIZER);
            }
        }
        Ok(())
    }
}

struct FakeNamespaces(Arc<ClusterState>);

#[async_trait]
impl NamespaceManagement for FakeNamespaces {
    async fn create(
        &self,
        _custom_part: &str,
        _annotations: &BTreeMap<String, String>,
    ) -> OperatorResult<String> {
        let counter = self.0.namespace_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let name = format!("steward-run-{counter:016}");
        self.0.namespaces.lock().insert(name.clone());
        self.0.created_namespaces.lock().push(name.clone());
        Ok(name)
    }

    async fn delete(&self, name: &str) -> OperatorResult<()> {
        if !name.starts_with("steward-run") {
            return Err(OperatorError::NamespaceRefused {
                name: name.to_string(),
                reason: "name does not start with 'steward-run'".to_string(),
            });
        }
        self.0.namespaces.lock().remove(name);
        Ok(())
    }
}

struct FakeSecretProvider(Arc<ClusterState>);

#[async_trait]
impl SecretProvider for FakeSecretProvider {
    async fn get_secret(&self, namespace: &str, name: &str) -> OperatorResult<Secret> {
        self.0
            .source_secrets
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| OperatorError::MissingSecret {
                name: name.to_string(),
                namespace: namespace.to_string(),
            })
    }
}

struct FakeRunNamespaceClient(Arc<ClusterState>);

#[async_trait]
impl RunNamespaceClient for FakeRunNamespaceClient {
    async fn create_secret(&self, _namespace: &str, secret: &Secret) -> OperatorResult<()> {
        if self.0.fail_secret_create.load(Ordering::SeqCst) {
            return Err(OperatorError::InvalidConfig(
                "injected secret create failure".into(),
            ));
        }
        self.0
            .copied_secrets
            .lock()
            .push(secret.metadata.name.clone().unwrap_or_default());
        Ok(())
    }

    async fn create_service_account(
        &self,
        _namespace: &str,
        _account: &ServiceAccount,
    ) -> OperatorResult<()> {
        Ok(())
    }

    async fn create_role_binding(
        &self,
        _namespace: &str,
        _binding: &RoleBinding,
    ) -> OperatorResult<()> {
        if self.0.fail_role_binding.load(Ordering::SeqCst) {
            return Err(OperatorError::InvalidConfig(
                "injected role binding failure".into(),
            ));
        }
        Ok(())
    }

    async fn create_task_run(&self, _namespace: &str, task_run: &TaskRun) -> OperatorResult<()> {
        *self.0.task_run.lock() = Some(task_run.clone());
        Ok(())
    }

    async fn get_task_run(&self, namespace: &str, name: &str) -> OperatorResult<Option<TaskRun>> {
        let guard = self.0.task_run.lock();
        Ok(guard.as_ref().cloned().filter(|tr| {
            tr.metadata.namespace.as_deref() == Some(namespace)
                && tr.metadata.name.as_deref() == Some(name)
        }))
    }
}

#[derive(Default)]
struct RecordingMetrics {
    starts: AtomicUsize,
    results: Mutex<Vec<RunResult>>,
}

impl Metrics for RecordingMetrics {
    fn count_start(&self) {
        self.starts.fetch_add(1, Ordering::SeqCst);
    }

    fn count_result(&self, result: RunResult) {
        self.results.lock().push(result);
    }

    fn observe_state_duration(&self, _state: State, _duration: std::time::Duration) {}

    fn set_tenant_count(&self, _count: f64) {}
}

struct Harness {
    state: Arc<ClusterState>,
    metrics: Arc<RecordingMetrics>,
    reconciler: Reconciler,
    namespace: String,
    name: String,
}

impl Harness {
    fn new(pipeline_run: PipelineRun, config: OperatorConfig) -> Self {
        let namespace = pipeline_run.metadata.namespace.clone().unwrap();
        let name = pipeline_run.metadata.name.clone().unwrap();

        let state = Arc::new(ClusterState::default());
        *state.pipeline_run.lock() = Some(pipeline_run);

        let metrics = Arc::new(RecordingMetrics::default());
        let pipeline_runs: Arc<dyn PipelineRunClient> =
            Arc::new(FakePipelineRunClient(state.clone()));
        let run_manager = Arc::new(RunManager::new(
            Arc::new(FakeNamespaces(state.clone())),
            Arc::new(FakeSecretProvider(state.clone())),
            Arc::new(FakeRunNamespaceClient(state.clone())),
            pipeline_runs.clone(),
            Arc::new(config),
        ));
        let reconciler = Reconciler::new(
            Arc::new(FakeFetcher(state.clone())),
            pipeline_runs,
            run_manager,
            metrics.clone(),
        );

        Self {
            state,
            metrics,
            reconciler,
            namespace,
            name,
        }
    }

    async fn reconcile(&self) -> OperatorResult<()> {
        self.reconciler
            .reconcile(&self.namespace, &self.name)
            .await
            .map(|_| ())
    }

    fn status(&self) -> PipelineRunStatus {
        self.state
            .pipeline_run
            .lock()
            .as_ref()
            .and_then(|pr| pr.status.clone())
            .unwrap_or_default()
    }

    fn finalizers(&self) -> Vec<String> {
        self.state
            .pipeline_run
            .lock()
            .as_ref()
            .and_then(|pr| pr.metadata.finalizers.clone())
            .unwrap_or_default()
    }

    fn task_run_param(&self, name: &str) -> Option<String> {
        let guard = self.state.task_run.lock();
        guard.as_ref().and_then(|tr| {
            tr.spec
                .params
                .iter()
                .find(|p| p.name == name)
                .map(|p| p.value.clone())
        })
    }

    fn mark_task_run_started(&self) {
        let mut guard = self.state.task_run.lock();
        let task_run = guard.as_mut().expect("task run must exist");
        task_run.status.get_or_insert_with(Default::default).start_time =
            Some(Utc::now().to_rfc3339());
    }

    fn mark_task_run_finished(&self, condition_status: &str, message: &str) {
        let mut guard = self.state.task_run.lock();
        let task_run = guard.as_mut().expect("task run must exist");
        let status = task_run.status.get_or_insert_with(Default::default);
        status.conditions = vec![RunCondition {
            condition_type: CONDITION_SUCCEEDED.into(),
            status: condition_status.into(),
            reason: None,
            message: Some("condition fallback".into()),
        }];
        status.steps = vec![StepState {
            name: JENKINSFILE_RUNNER_STEP.into(),
            container: ContainerState {
                terminated: Some(ContainerStateTerminated {
                    exit_code: 0,
                    message: Some(message.to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            },
        }];
    }

    fn set_intent_kill(&self) {
        let mut guard = self.state.pipeline_run.lock();
        if let Some(pr) = guard.as_mut() {
            pr.spec.intent = Intent::Kill;
        }
    }

    fn set_deletion_timestamp(&self) {
        let mut guard = self.state.pipeline_run.lock();
        if let Some(pr) = guard.as_mut() {
            pr.metadata.deletion_timestamp = Some(Time(Utc::now()));
        }
    }
}

fn pipeline_run(namespace: &str, name: &str, spec: PipelineRunSpec) -> PipelineRun {
    let mut pr = PipelineRun::new(name, spec);
    pr.metadata.namespace = Some(namespace.to_string());
    pr
}

fn minimal_spec() -> PipelineRunSpec {
    PipelineRunSpec {
        jenkins_file: JenkinsFile {
            url: "git://x".into(),
            revision: "main".into(),
            path: "Jfile".into(),
        },
        args: BTreeMap::new(),
        secrets: vec![],
        intent: Intent::Run,
        logging: None,
    }
}

#[tokio::test]
async fn happy_path_traverses_all_states() {
    let harness = Harness::new(
        pipeline_run("p1", "r1", minimal_spec()),
        OperatorConfig::default(),
    );

    // First pass: prepare the environment and launch the task run.
    harness.reconcile().await.unwrap();
    let status = harness.status();
    assert_eq!(status.state, State::Waiting);
    assert!(status.run_namespace.starts_with("steward-run-"));
    assert_eq!(status.run_namespace.len(), "steward-run-".len() + 16);
    assert_eq!(
        harness.task_run_param("PIPELINE_LOG_ELASTICSEARCH_INDEX_URL"),
        Some(String::new())
    );
    assert_eq!(harness.finalizers(), vec![FINALIZER.to_string()]);

    // The task run has not started: the run keeps waiting.
    harness.reconcile().await.unwrap();
    assert_eq!(harness.status().state, State::Waiting);

    harness.mark_task_run_started();
    harness.reconcile().await.unwrap();
    assert_eq!(harness.status().state, State::Running);

    harness.mark_task_run_finished("True", "All good");
    harness.reconcile().await.unwrap();
    let status = harness.status();
    assert_eq!(status.state, State::Cleaning);
    assert_eq!(status.result, RunResult::Success);
    assert_eq!(status.message, "All good");
    assert!(status.container.is_some());

    harness.reconcile().await.unwrap();
    let status = harness.status();
    assert_eq!(status.state, State::Finished);
    assert!(status.finished_at.is_some());

    // Exactly one namespace was ever created, and it is gone.
    assert_eq!(harness.state.created_namespaces.lock().len(), 1);
    assert!(harness.state.namespaces.lock().is_empty());

    let states: Vec<State> = harness
        .status()
        .state_history
        .iter()
        .map(|item| item.state)
        .collect();
    assert_eq!(
        states,
        vec![
            State::Preparing,
            State::Waiting,
            State::Running,
            State::Cleaning,
            State::Finished,
        ]
    );

    assert_eq!(harness.metrics.starts.load(Ordering::SeqCst), 1);
    assert_eq!(*harness.metrics.results.lock(), vec![RunResult::Success]);
}

#[tokio::test]
async fn kill_before_start_short_circuits() {
    let mut spec = minimal_spec();
    spec.intent = Intent::Kill;
    let harness = Harness::new(pipeline_run("p1", "r2", spec), OperatorConfig::default());

    harness.reconcile().await.unwrap();
    let status = harness.status();
    assert_eq!(status.state, State::Cleaning);
    assert_eq!(status.result, RunResult::Killed);
    assert_eq!(status.message, MESSAGE_KILLED);

    // No environment was ever provisioned.
    assert!(harness.state.created_namespaces.lock().is_empty());
    assert!(harness.state.task_run.lock().is_none());

    // Further passes are no-ops.
    let patches = harness.state.status_patches.load(Ordering::SeqCst);
    harness.reconcile().await.unwrap();
    assert_eq!(harness.state.status_patches.load(Ordering::SeqCst), patches);
    assert_eq!(harness.status().result, RunResult::Killed);
}

#[tokio::test]
async fn kill_after_finish_only_normalizes_the_message() {
    let mut pr = pipeline_run("p1", "r3", minimal_spec());
    let mut status = PipelineRunStatus::default();
    status.enter_state(State::Finished, Utc::now());
    status.set_result(RunResult::Success);
    status.set_message("All good");
    pr.status = Some(status);

    let harness = Harness::new(pr, OperatorConfig::default());
    harness.set_intent_kill();

    harness.reconcile().await.unwrap();
    let status = harness.status();
    assert_eq!(status.result, RunResult::Success);
    assert_eq!(status.message, MESSAGE_CANNOT_KILL);
    assert_eq!(status.state, State::Finished);

    // The message is not rewritten on later passes.
    let patches = harness.state.status_patches.load(Ordering::SeqCst);
    harness.reconcile().await.unwrap();
    assert_eq!(harness.state.status_patches.load(Ordering::SeqCst), patches);
}

#[tokio::test]
async fn missing_secret_fails_the_run_as_content_error() {
    let mut spec = minimal_spec();
    spec.secrets = vec!["s-missing".into()];
    let harness = Harness::new(pipeline_run("p1", "r4", spec), OperatorConfig::default());

    harness.reconcile().await.unwrap();
    let status = harness.status();
    assert_eq!(status.state, State::Cleaning);
    assert_eq!(status.result, RunResult::ErrorContent);
    assert!(status.message.contains("secret 's-missing' not found"));

    // The half-built namespace was rolled back already.
    assert_eq!(harness.state.created_namespaces.lock().len(), 1);
    assert!(harness.state.namespaces.lock().is_empty());
    assert!(harness.state.task_run.lock().is_none());

    harness.reconcile().await.unwrap();
    assert_eq!(harness.status().state, State::Finished);
}

#[tokio::test]
async fn secret_create_failures_are_ignored() {
    // Pinned behaviour: a create failure for an individual secret
    // copy is logged but does not abort preparation.
    let mut spec = minimal_spec();
    spec.secrets = vec!["s1".into()];
    let pr = pipeline_run("p1", "r5", spec);
    let harness = Harness::new(pr, OperatorConfig::default());
    harness.state.source_secrets.lock().insert(
        "s1".into(),
        Secret {
            metadata: kube::api::ObjectMeta {
                name: Some("s1".into()),
                namespace: Some("p1".into()),
                ..Default::default()
            },
            ..Default::default()
        },
    );
    harness.state.fail_secret_create.store(true, Ordering::SeqCst);

    harness.reconcile().await.unwrap();
    let status = harness.status();
    assert_eq!(status.state, State::Waiting);
    assert!(harness.state.copied_secrets.lock().is_empty());
    assert!(harness.state.task_run.lock().is_some());
}

#[tokio::test]
async fn start_failure_rolls_back_and_finishes_via_cleaning() {
    let harness = Harness::new(
        pipeline_run("p1", "r6", minimal_spec()),
        OperatorConfig::default(),
    );
    harness.state.fail_role_binding.store(true, Ordering::SeqCst);

    harness.reconcile().await.unwrap();
    let status = harness.status();
    assert_eq!(status.state, State::Cleaning);
    assert!(status.message.contains("failed to create role binding"));
    assert!(!status.run_namespace.is_empty());

    // Rollback deleted the namespace within the same pass.
    assert!(harness.state.namespaces.lock().is_empty());

    harness.reconcile().await.unwrap();
    assert_eq!(harness.status().state, State::Finished);
    assert_eq!(harness.state.created_namespaces.lock().len(), 1);
}

#[tokio::test]
async fn interrupted_preparation_is_rolled_back() {
    let mut pr = pipeline_run("p1", "r7", minimal_spec());
    let mut status = PipelineRunStatus::default();
    status.enter_state(State::Preparing, Utc::now());
    status.run_namespace = "steward-run-0000000000000001".into();
    pr.status = Some(status);

    let harness = Harness::new(pr, OperatorConfig::default());
    harness
        .state
        .namespaces
        .lock()
        .insert("steward-run-0000000000000001".into());

    harness.reconcile().await.unwrap();
    let status = harness.status();
    assert_eq!(status.state, State::Cleaning);
    assert_eq!(status.result, RunResult::ErrorInfra);

    harness.reconcile().await.unwrap();
    assert_eq!(harness.status().state, State::Finished);
    // No second namespace was created during recovery.
    assert!(harness.state.created_namespaces.lock().is_empty());
    assert!(harness.state.namespaces.lock().is_empty());
}

#[tokio::test]
async fn deletion_cleans_up_and_releases_the_finalizer() {
    let harness = Harness::new(
        pipeline_run("p1", "r8", minimal_spec()),
        OperatorConfig::default(),
    );

    harness.reconcile().await.unwrap();
    assert_eq!(harness.finalizers(), vec![FINALIZER.to_string()]);
    assert_eq!(harness.state.namespaces.lock().len(), 1);

    harness.set_deletion_timestamp();
    harness.reconcile().await.unwrap();

    assert!(harness.finalizers().is_empty());
    assert!(harness.state.namespaces.lock().is_empty());
}

#[tokio::test]
async fn configured_secrets_are_copied_alongside_user_secrets() {
    let mut config = OperatorConfig::default();
    config.scm_clone_secret = "scm-clone".into();
    config.image_pull_secret = "pull".into();

    let mut spec = minimal_spec();
    spec.secrets = vec!["user-secret".into()];
    let harness = Harness::new(pipeline_run("p1", "r9", spec), config);

    for name in ["user-secret", "scm-clone", "pull"] {
        harness.state.source_secrets.lock().insert(
            name.into(),
            Secret {
                metadata: kube::api::ObjectMeta {
                    name: Some(name.into()),
                    namespace: Some("p1".into()),
                    ..Default::default()
                },
                ..Default::default()
            },
        );
    }

    harness.reconcile().await.unwrap();
    assert_eq!(harness.status().state, State::Waiting);
    assert_eq!(
        *harness.state.copied_secrets.lock(),
        vec![
            "user-secret".to_string(),
            "scm-clone".to_string(),
            "pull".to_string()
        ]
    );

    let account_task_run = harness.state.task_run.lock().clone().unwrap();
    assert_eq!(
        account_task_run.metadata.name.as_deref(),
        Some(TASK_RUN_NAME)
    );
}
