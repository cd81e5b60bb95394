use std::sync::OnceLock;
use std::time::Instant;

use axum::body::Body;
use axum::extract::{MatchedPath, State};
use axum::http::Request;
use axum::http::{HeaderValue, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Opts as PromOpts,
    Registry, TextEncoder,
};

use scrivener::JobStatus;

use crate::AppState;

const JOB_STATUSES: [JobStatus; 5] = [
    JobStatus::Queued,
    JobStatus::Processing,
    JobStatus::Completed,
    JobStatus::Failed,
    JobStatus::Partial,
];

struct Metrics {
    registry: Registry,
    http_requests_total: IntCounterVec,
    http_request_duration_seconds: HistogramVec,
    http_in_flight_requests: IntGauge,
    jobs: IntGaugeVec,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

fn build() -> prometheus::Result<Metrics> {
    let registry = Registry::new();

    let http_requests_total = IntCounterVec::new(
        PromOpts::new(
            "scrivener_http_requests_total",
            "Total HTTP requests served by scrivener-server.",
        ),
        &["status"],
    )?;

    let http_request_duration_seconds = HistogramVec::new(
        HistogramOpts::new(
            "scrivener_http_request_duration_seconds",
            "HTTP request latency in seconds.",
        ),
        &["status"],
    )?;

    let http_in_flight_requests = IntGauge::new(
        "scrivener_http_in_flight_requests",
        "Current number of in-flight HTTP requests.",
    )?;

    let jobs = IntGaugeVec::new(
        PromOpts::new("scrivener_jobs", "Jobs held in the registry, by status."),
        &["status"],
    )?;

    registry.register(Box::new(http_requests_total.clone()))?;
    registry.register(Box::new(http_request_duration_seconds.clone()))?;
    registry.register(Box::new(http_in_flight_requests.clone()))?;
    registry.register(Box::new(jobs.clone()))?;

    Ok(Metrics {
        registry,
        http_requests_total,
        http_request_duration_seconds,
        http_in_flight_requests,
        jobs,
    })
}

/// Register every metric. Until this succeeds, requests are served without being counted.
pub fn init() -> prometheus::Result<()> {
    if METRICS.get().is_some() {
        return Ok(());
    }
    let _ = METRICS.set(build()?);
    Ok(())
}

pub async fn prometheus_metrics(State(state): State<AppState>) -> Response {
    let Some(metrics) = METRICS.get() else {
        return (StatusCode::SERVICE_UNAVAILABLE, "metrics are disabled").into_response();
    };

    // Job gauges are computed from the registry at scrape time.
    let counts = state.service.registry().status_counts();
    for status in JOB_STATUSES {
        let count = counts.get(&status).copied().unwrap_or(0);
        metrics
            .jobs
            .with_label_values(&[status.as_str()])
            .set(count as i64);
    }

    let families = metrics.registry.gather();
    let mut buf = Vec::new();
    if TextEncoder::new().encode(&families, &mut buf).is_err() {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            "failed to encode metrics",
        )
            .into_response();
    }

    (
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; version=0.0.4; charset=utf-8"),
        )],
        buf,
    )
        .into_response()
}

pub async fn track_http_metrics(req: Request<Body>, next: Next) -> Response {
    let Some(metrics) = METRICS.get() else {
        return next.run(req).await;
    };

    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str())
        .unwrap_or_else(|| req.uri().path())
        .to_owned();

    if route == "/metrics" || route == "/healthz" {
        return next.run(req).await;
    }

    let start = Instant::now();

    metrics.http_in_flight_requests.inc();
    let response = next.run(req).await;
    metrics.http_in_flight_requests.dec();

    let status = response.status().as_u16().to_string();
    metrics
        .http_requests_total
        .with_label_values(&[&status])
        .inc();
    metrics
        .http_request_duration_seconds
        .with_label_values(&[&status])
        .observe(start.elapsed().as_secs_f64());

    response
}
