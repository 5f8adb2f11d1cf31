use std::convert::Infallible;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{Query, State},
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::IntervalStream;
use tokio_stream::StreamExt;

use super::AppError;
use crate::monitor::perf::DistBucket;
use crate::monitor::PerformanceReport;
use crate::timing::normalizer::{RequestTimingSample, VulnerabilityAssessment};
use crate::timing::{PercentileWindow, TimingStatistics};
use crate::AppState;

// ─── GET /api/admin/performance/stats ────────────────────────────

#[derive(Debug, Serialize)]
pub struct SlaStatus {
    pub target: String,
    pub breaching: bool,
    pub breaching_endpoints: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct PerformanceStatsResponse {
    pub timestamp: DateTime<Utc>,
    pub stats: PerformanceReport,
    pub sla_status: SlaStatus,
    pub distribution: Vec<DistBucket>,
}

pub async fn performance_stats(
    State(state): State<Arc<AppState>>,
) -> Json<PerformanceStatsResponse> {
    let stats = state.monitor.stats();
    let breaching = stats.summary.critical_breaching_sla.clone();

    Json(PerformanceStatsResponse {
        timestamp: Utc::now(),
        sla_status: SlaStatus {
            target: format!("P95 < {:.0}ms", state.config.p95_target_ms),
            breaching: !breaching.is_empty(),
            breaching_endpoints: breaching,
        },
        distribution: state.monitor.distribution(),
        stats,
    })
}

// ─── GET /api/admin/timing/metrics ───────────────────────────────

#[derive(Debug, Deserialize)]
pub struct TimingMetricsQuery {
    pub endpoint: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TimingMetricsResponse {
    pub timestamp: DateTime<Utc>,
    pub metrics_count: usize,
    pub statistics: TimingStatistics,
    pub vulnerability_assessment: VulnerabilityAssessment,
    pub recent_metrics: Vec<RequestTimingSample>,
}

pub async fn timing_metrics(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TimingMetricsQuery>,
) -> Json<TimingMetricsResponse> {
    let statistics = state.normalizer.statistics(query.endpoint.as_deref());
    let vulnerability_assessment = state.normalizer.assess_vulnerability(&statistics);

    Json(TimingMetricsResponse {
        timestamp: Utc::now(),
        metrics_count: state.normalizer.sample_count(),
        statistics,
        vulnerability_assessment,
        recent_metrics: state.normalizer.recent_samples(50),
    })
}

// ─── GET /api/admin/timing/config ────────────────────────────────

#[derive(Debug, Serialize)]
pub struct PolicyRow {
    pub pattern: String,
    pub baseline_ms: f64,
    pub jitter_range_ms: f64,
    pub enabled: bool,
}

pub async fn timing_config(State(state): State<Arc<AppState>>) -> Json<Vec<PolicyRow>> {
    let rows = state
        .normalizer
        .policy_table()
        .into_iter()
        .map(|(pattern, policy)| PolicyRow {
            pattern,
            baseline_ms: policy.baseline_ms,
            jitter_range_ms: policy.jitter_range_ms,
            enabled: policy.enabled,
        })
        .collect();
    Json(rows)
}

// ─── POST /api/admin/timing/selftest ─────────────────────────────

const MAX_SELFTEST_ITERATIONS: usize = 1000;

#[derive(Debug, Deserialize)]
pub struct SelfTestRequest {
    #[serde(default = "default_iterations")]
    pub iterations: usize,
}

fn default_iterations() -> usize {
    100
}

#[derive(Debug, Serialize)]
pub struct SelfTestResponse {
    pub iterations: usize,
    pub mean_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
}

/// Calibration aid: drives simulated probes through the same timer the
/// normalizer uses and reports the spread an attacker would observe. The
/// probes are in-process simulations, not replayed HTTP requests.
pub async fn timing_selftest(
    State(_state): State<Arc<AppState>>,
    Json(req): Json<SelfTestRequest>,
) -> Result<Json<SelfTestResponse>, AppError> {
    if req.iterations == 0 || req.iterations > MAX_SELFTEST_ITERATIONS {
        return Err(AppError::BadRequest(format!(
            "iterations must be between 1 and {MAX_SELFTEST_ITERATIONS}"
        )));
    }

    let mut rng = StdRng::seed_from_u64(req.iterations as u64);
    let mut window = PercentileWindow::new(req.iterations);

    for _ in 0..req.iterations {
        let start = Instant::now();
        let simulated_ms = 15.0 + rng.gen::<f64>() * 5.0;
        tokio::time::sleep(Duration::from_micros((simulated_ms * 1000.0) as u64)).await;
        window.observe(start.elapsed().as_secs_f64() * 1000.0);
    }

    Ok(Json(SelfTestResponse {
        iterations: req.iterations,
        mean_ms: window.avg(),
        min_ms: window.min(),
        max_ms: window.max(),
        p50_ms: window.percentile(50.0),
        p95_ms: window.percentile(95.0),
        p99_ms: window.percentile(99.0),
    }))
}

// ─── POST /api/admin/performance/reset ───────────────────────────

#[derive(Debug, Serialize)]
pub struct ResetResponse {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
}

/// Clears every in-memory aggregate — monitor and normalizer alike.
/// Refused with 403 when the process runs in production mode.
pub async fn reset_metrics(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ResetResponse>, AppError> {
    state
        .monitor
        .reset()
        .map_err(|err| AppError::Forbidden(err.to_string()))?;
    state.normalizer.reset();

    Ok(Json(ResetResponse {
        status: "reset",
        timestamp: Utc::now(),
    }))
}

// ─── GET /api/admin/metrics/stream ───────────────────────────────

#[derive(Debug, Serialize)]
struct StreamSnapshot {
    timestamp: DateTime<Utc>,
    performance: PerformanceReport,
    timing: TimingStatistics,
}

/// Server-Sent Events feed for the admin dashboard: a combined snapshot
/// of both instruments every 500 ms.
pub async fn metrics_stream(
    State(state): State<Arc<AppState>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let interval = tokio::time::interval(Duration::from_millis(500));

    let stream = IntervalStream::new(interval).map(move |_| {
        let snapshot = StreamSnapshot {
            timestamp: Utc::now(),
            performance: state.monitor.stats(),
            timing: state.normalizer.statistics(None),
        };
        let json = serde_json::to_string(&snapshot).unwrap_or_default();
        Ok(Event::default().data(json))
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}
