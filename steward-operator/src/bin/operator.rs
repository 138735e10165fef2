//! Steward operator binary.
//!
//! Runs the PipelineRun controller and the metrics endpoint until a
//! shutdown signal arrives.

use kube::{Client, CustomResourceExt};
use std::sync::Arc;
use steward_operator::config::OperatorConfig;
use steward_operator::crd::PipelineRun;
use steward_operator::metrics::{self, PrometheusMetrics};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("steward_operator=info".parse()?)
                .add_directive("kube=info".parse()?),
        )
        .init();

    // CRD generation mode for cluster setup tooling.
    if std::env::args().any(|arg| arg == "--generate-crds") {
        println!("---");
        println!("{}", serde_yaml::to_string(&PipelineRun::crd())?);
        return Ok(());
    }

    let config = OperatorConfig::from_env()?;
    tracing::info!("Starting Steward operator");

    let client = Client::try_default().await?;
    tracing::info!("Connected to Kubernetes cluster");

    let prometheus = PrometheusMetrics::new()?;
    let registry = prometheus.registry();
    let metrics: Arc<dyn metrics::Metrics> = Arc::new(prometheus);

    let metrics_port = config.metrics_port;
    tokio::select! {
        result = metrics::serve(registry, metrics_port) => {
            tracing::error!("Metrics endpoint exited: {:?}", result);
            result?;
        }
        result = steward_operator::controller::run(client, config, metrics) => {
            result?;
        }
    }

    Ok(())
}
