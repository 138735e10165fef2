//! Operator metrics.
//!
//! The reconciler depends on the [`Metrics`] interface rather than on
//! process globals; the prometheus-backed implementation is created
//! once at startup and its registry is served over HTTP. Emission is
//! side-effect-only so a metrics problem can never influence a state
//! transition.

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{
    Encoder, Gauge, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry,
    TextEncoder,
};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;

use crate::crd::{RunResult, State};
use crate::error::OperatorResult;

/// Metrics emitted by the operator.
pub trait Metrics: Send + Sync {
    /// A pipeline run was started.
    fn count_start(&self);

    /// A pipeline run completed with `result`.
    fn count_result(&self, result: RunResult);

    /// A pipeline run left `state` after `duration`.
    fn observe_state_duration(&self, state: State, duration: Duration);

    /// Set the total number of tenants.
    fn set_tenant_count(&self, count: f64);
}

/// Prometheus-backed metrics.
pub struct PrometheusMetrics {
    registry: Registry,
    started: IntCounter,
    completed: IntCounterVec,
    state_duration: HistogramVec,
    tenant_count: Gauge,
}

impl PrometheusMetrics {
    /// Create the metrics and register them in a fresh registry.
    pub fn new() -> OperatorResult<Self> {
        let registry = Registry::new();

        let started = IntCounter::new(
            "steward_pipelineruns_started_total",
            "Total number of pipeline runs started.",
        )?;
        registry.register(Box::new(started.clone()))?;

        let completed = IntCounterVec::new(
            Opts::new(
                "steward_pipelineruns_completed_total",
                "Total number of completed pipeline runs by result.",
            ),
            &["result"],
        )?;
        registry.register(Box::new(completed.clone()))?;

        let state_duration = HistogramVec::new(
            HistogramOpts::new(
                "steward_pipelinerun_state_duration_seconds",
                "Time pipeline runs spend in each state.",
            )
            .buckets(vec![1.0, 5.0, 10.0, 30.0, 60.0, 300.0, 600.0, 1800.0, 3600.0]),
            &["state"],
        )?;
        registry.register(Box::new(state_duration.clone()))?;

        let tenant_count = Gauge::new("steward_tenant_total_number", "total number of tenants")?;
        registry.register(Box::new(tenant_count.clone()))?;

        Ok(Self {
            registry,
            started,
            completed,
            state_duration,
            tenant_count,
        })
    }

    /// The registry holding all operator metrics.
    pub fn registry(&self) -> Registry {
        self.registry.clone()
    }
}

impl Metrics for PrometheusMetrics {
    fn count_start(&self) {
        self.started.inc();
    }

    fn count_result(&self, result: RunResult) {
        self.completed
            .with_label_values(&[&result.to_string()])
            .inc();
    }

    fn observe_state_duration(&self, state: State, duration: Duration) {
        self.state_duration
            .with_label_values(&[&state.to_string()])
            .observe(duration.as_secs_f64());
    }

    fn set_tenant_count(&self, count: f64) {
        self.tenant_count.set(count);
    }
}

/// Serve `GET /metrics` on `0.0.0.0:<port>` until the process exits.
pub async fn serve(registry: Registry, port: u16) -> OperatorResult<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "Serving metrics endpoint");

    loop {
        let (stream, _) = listener.accept().await?;
        let registry = registry.clone();
        tokio::spawn(async move {
            let service = service_fn(move |request: Request<Incoming>| {
                let registry = registry.clone();
                async move { respond(&request, &registry) }
            });
            if let Err(err) = http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service)
                .await
            {
                tracing::debug!(error = %err, "Metrics connection error");
            }
        });
    }
}

fn respond(
    request: &Request<Incoming>,
    registry: &Registry,
) -> Result<Response<Full<Bytes>>, Infallible> {
    if request.method() != Method::GET || request.uri().path() != "/metrics" {
        let mut response = Response::new(Full::default());
        *response.status_mut() = StatusCode::NOT_FOUND;
        return Ok(response);
    }

    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&registry.gather(), &mut buffer) {
        tracing::error!(error = %err, "Failed to encode metrics");
        let mut response = Response::new(Full::default());
        *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
        return Ok(response);
    }

    let mut response = Response::new(Full::new(Bytes::from(buffer)));
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_str(encoder.format_type())
            .unwrap_or_else(|_| HeaderValue::from_static("text/plain")),
    );
    Ok(response)
}
