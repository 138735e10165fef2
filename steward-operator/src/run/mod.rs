//! Run lifecycle: provisioning, observation and teardown of the
//! per-run environment.

mod manager;
mod resources;
mod view;

pub use manager::{RunManagement, RunManager};
pub use resources::{
    build_role_binding, build_service_account, build_task_run, CLUSTER_TASK_NAME,
    JENKINSFILE_RUNNER_STEP, SERVICE_ACCOUNT_NAME, TASK_RUN_NAME,
};
pub use view::RunView;
