//! Prometheus counters and the optional metrics listener.

use std::{net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use axum::{
    Router,
    body::Body,
    extract::State,
    http::{HeaderValue, StatusCode, header},
    response::Response,
    routing::get,
};
use prometheus::{Encoder, IntCounter, Opts, Registry, TextEncoder};
use tokio::net::TcpListener;
use tracing::{error, info};

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

pub struct Metrics {
    registry: Registry,
    requests_total: IntCounter,
    blocked_total: IntCounter,
    override_total: IntCounter,
    cache_hits_total: IntCounter,
    cache_misses_total: IntCounter,
    upstream_responses_total: IntCounter,
    upstream_failures_total: IntCounter,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let counter = |name: &str, help: &str| -> Result<IntCounter, prometheus::Error> {
            let opts = Opts::new(name, help);
            IntCounter::with_opts(opts)
        };

        let requests_total = counter(
            "dohgate_requests_total",
            "Total number of DNS queries received",
        )?;
        let blocked_total = counter(
            "dohgate_blocked_total",
            "Number of queries answered from the block-list",
        )?;
        let override_total = counter(
            "dohgate_override_total",
            "Number of queries answered from the override table",
        )?;
        let cache_hits_total = counter(
            "dohgate_cache_hits_total",
            "Number of responses served from cache",
        )?;
        let cache_misses_total = counter(
            "dohgate_cache_misses_total",
            "Number of cache lookups that missed",
        )?;
        let upstream_responses_total = counter(
            "dohgate_upstream_responses_total",
            "Number of responses fetched from upstream resolvers",
        )?;
        let upstream_failures_total = counter(
            "dohgate_upstream_failures_total",
            "Number of upstream fetches that failed",
        )?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(blocked_total.clone()))?;
        registry.register(Box::new(override_total.clone()))?;
        registry.register(Box::new(cache_hits_total.clone()))?;
        registry.register(Box::new(cache_misses_total.clone()))?;
        registry.register(Box::new(upstream_responses_total.clone()))?;
        registry.register(Box::new(upstream_failures_total.clone()))?;

        Ok(Self {
            registry,
            requests_total,
            blocked_total,
            override_total,
            cache_hits_total,
            cache_misses_total,
            upstream_responses_total,
            upstream_failures_total,
        })
    }

    pub fn inc_request(&self) {
        self.requests_total.inc();
    }

    pub fn inc_blocked(&self) {
        self.blocked_total.inc();
    }

    pub fn inc_override(&self) {
        self.override_total.inc();
    }

    pub fn inc_cache_hit(&self) {
        self.cache_hits_total.inc();
    }

    pub fn inc_cache_miss(&self) {
        self.cache_misses_total.inc();
    }

    pub fn inc_upstream_response(&self) {
        self.upstream_responses_total.inc();
    }

    pub fn inc_upstream_failure(&self) {
        self.upstream_failures_total.inc();
    }

    pub fn render(&self) -> Result<Vec<u8>, prometheus::Error> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(buffer)
    }
}

pub async fn run_metrics_server(addr: &str, metrics: Arc<Metrics>) -> Result<()> {
    let socket_addr: SocketAddr = addr
        .parse()
        .with_context(|| format!("Invalid metrics listener address: {addr}"))?;

    let listener = TcpListener::bind(socket_addr)
        .await
        .with_context(|| format!("Failed to bind metrics listener at {socket_addr}"))?;

    info!(listener = %socket_addr, "Starting metrics server");

    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metrics);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(crate::server::shutdown_signal())
        .await
        .context("Metrics server terminated unexpectedly")
}

async fn metrics_handler(State(metrics): State<Arc<Metrics>>) -> Response {
    match metrics.render() {
        Ok(buffer) => {
            let mut response = Response::new(Body::from(buffer));
            *response.status_mut() = StatusCode::OK;
            response.headers_mut().insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static(PROMETHEUS_CONTENT_TYPE),
            );
            response
        }
        Err(err) => {
            error!(error = %err, "Failed to render metrics");
            let mut response = Response::new(Body::from(err.to_string()));
            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            response
        }
    }
}
