//! Prometheus metrics for the query loop.
//!
//! Exposes:
//! - `agentic_rag_query_duration_seconds` (histogram)
//! - `agentic_rag_queries_total` (counter with status)
//! - `agentic_rag_queries_inflight` (gauge)
//! - `agentic_rag_iterations` (histogram)
//! - `agentic_rag_strategy_total` (counter per strategy)
//! - `agentic_rag_external_failures_total` (counter per external service)
//! - `agentic_rag_command_duration_seconds` / `agentic_rag_commands_total` (CLI commands)
//! - process metrics via `process` collector

use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use once_cell::sync::Lazy;
use prometheus::process_collector::ProcessCollector;
use prometheus::{
    default_registry, register_histogram, register_histogram_vec, register_int_counter_vec,
    register_int_gauge, Encoder, Histogram, HistogramVec, IntCounterVec, IntGauge, TextEncoder,
};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

static PROCESS_COLLECTOR: Lazy<()> = Lazy::new(|| {
    if let Err(err) = default_registry().register(Box::new(ProcessCollector::for_self())) {
        warn!("Failed to register process collector: {}", err);
    }
});

static QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    // Exponential buckets from 50ms up to ~3 minutes.
    let buckets =
        prometheus::exponential_buckets(0.05, 2.0, 14).expect("failed to create histogram buckets");
    register_histogram_vec!(
        "agentic_rag_query_duration_seconds",
        "End-to-end query duration in seconds",
        &["mode"],
        buckets
    )
    .expect("failed to register query duration histogram")
});

static QUERY_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "agentic_rag_queries_total",
        "Total queries by terminal decision",
        &["status"]
    )
    .expect("failed to register query counter")
});

static QUERY_INFLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("agentic_rag_queries_inflight", "Number of in-flight queries")
        .expect("failed to register inflight gauge")
});

static ITERATIONS: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "agentic_rag_iterations",
        "Agent loop iterations per query",
        vec![1.0, 2.0, 3.0, 4.0, 5.0, 8.0, 13.0]
    )
    .expect("failed to register iterations histogram")
});

static STRATEGY_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "agentic_rag_strategy_total",
        "Retrieval strategy executions",
        &["strategy"]
    )
    .expect("failed to register strategy counter")
});

static EXTERNAL_FAILURES: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "agentic_rag_external_failures_total",
        "External calls that fell back to a default value",
        &["service"]
    )
    .expect("failed to register external failure counter")
});

static COMMAND_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "agentic_rag_command_duration_seconds",
        "CLI command duration in seconds",
        &["command"]
    )
    .expect("failed to register command duration histogram")
});

static COMMAND_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "agentic_rag_commands_total",
        "CLI commands by outcome",
        &["command", "status"]
    )
    .expect("failed to register command counter")
});

/// Ensure collectors are registered.
fn init_collectors() {
    Lazy::force(&PROCESS_COLLECTOR);
    Lazy::force(&QUERY_DURATION);
    Lazy::force(&QUERY_TOTAL);
    Lazy::force(&QUERY_INFLIGHT);
    Lazy::force(&ITERATIONS);
    Lazy::force(&STRATEGY_TOTAL);
    Lazy::force(&EXTERNAL_FAILURES);
    Lazy::force(&COMMAND_DURATION);
    Lazy::force(&COMMAND_TOTAL);
}

/// Increment the in-flight gauge.
pub fn record_query_start() {
    init_collectors();
    QUERY_INFLIGHT.inc();
}

/// Record query completion.
pub fn record_query_result(mode: &'static str, duration: Duration, iterations: usize, status: &str) {
    init_collectors();
    QUERY_INFLIGHT.dec();
    QUERY_DURATION
        .with_label_values(&[mode])
        .observe(duration.as_secs_f64());
    ITERATIONS.observe(iterations as f64);
    QUERY_TOTAL.with_label_values(&[status]).inc();
}

/// Count one strategy execution.
pub fn record_strategy(strategy: &str) {
    init_collectors();
    STRATEGY_TOTAL.with_label_values(&[strategy]).inc();
}

/// Count one external call that fell back.
pub fn record_external_failure(service: &str) {
    init_collectors();
    EXTERNAL_FAILURES.with_label_values(&[service]).inc();
}

/// Record CLI command completion.
pub fn record_command_result(command: &'static str, duration: Duration, success: bool) {
    init_collectors();
    COMMAND_DURATION
        .with_label_values(&[command])
        .observe(duration.as_secs_f64());
    COMMAND_TOTAL
        .with_label_values(&[command, if success { "ok" } else { "error" }])
        .inc();
}

async fn metrics_response() -> Result<Response<Full<Bytes>>, Infallible> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", err);
        let mut response = Response::new(Full::from("encode error"));
        *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
        return Ok(response);
    }

    let mut response = Response::new(Full::from(buffer));
    if let Ok(value) = hyper::header::HeaderValue::from_str(encoder.format_type()) {
        response
            .headers_mut()
            .insert(hyper::header::CONTENT_TYPE, value);
    }
    Ok(response)
}

async fn handle_request(req: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
    match req.uri().path() {
        "/metrics" => metrics_response().await,
        _ => {
            let mut response = Response::new(Full::new(Bytes::new()));
            *response.status_mut() = StatusCode::NOT_FOUND;
            Ok(response)
        }
    }
}

async fn serve(addr: SocketAddr) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "Prometheus metrics endpoint started");

    loop {
        let (stream, peer) = listener.accept().await?;
        let service = service_fn(handle_request);
        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                warn!(?peer, "Metrics connection error: {}", err);
            }
        });
    }
}

/// Spawn the metrics HTTP endpoint on the given address.
pub fn spawn_metrics_server(addr: SocketAddr) {
    init_collectors();
    tokio::spawn(async move {
        if let Err(err) = serve(addr).await {
            error!(%addr, "Metrics server failed: {}", err);
        }
    });
}
