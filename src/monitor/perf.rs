use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Request, State};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use chrono::{DateTime, Utc};
use hdrhistogram::Histogram;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use super::endpoint::endpoint_key;
use super::memory::MemoryProbe;
use crate::config::RuntimeConfig;
use crate::timing::PercentileWindow;

// ─── Configuration ───────────────────────────────────────────────

/// Inbound/outbound header carrying the per-request correlation id.
pub const CORRELATION_HEADER: &str = "x-correlation-id";

/// Ring-buffer size backing each endpoint's percentile window.
const RECENT_WINDOW: usize = 1000;

/// Hard cap on the in-flight map; a stalled sweep must not leak memory.
const MAX_IN_FLIGHT: usize = 10_000;

/// HdrHistogram range for the global distribution: 1 μs → 60 s, 3 sigfig.
const HIST_LOW: u64 = 1;
const HIST_HIGH: u64 = 60_000_000;
const HIST_SIGFIG: u8 = 3;

// ─── Public types ────────────────────────────────────────────────

/// One observation as recorded for a completed request.
#[derive(Debug, Clone, Serialize)]
pub struct EndpointPerformanceSample {
    pub endpoint: String,
    pub method: String,
    pub true_duration_ms: f64,
    pub memory_delta_bytes: i64,
    pub is_slow: bool,
    pub is_critical: bool,
    pub status: u16,
    pub timestamp: DateTime<Utc>,
}

/// Read-side projection of one endpoint's aggregate.
#[derive(Debug, Clone, Serialize)]
pub struct EndpointStatsView {
    pub total_requests: u64,
    pub slow_requests: u64,
    pub total_time_ms: f64,
    pub avg_time_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub error_count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PerformanceSummary {
    pub total_requests: u64,
    pub slow_requests: u64,
    pub worst_endpoint: Option<String>,
    pub avg_response_time_ms: f64,
    pub critical_breaching_sla: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PerformanceReport {
    pub endpoints: HashMap<String, EndpointStatsView>,
    pub summary: PerformanceSummary,
}

/// A bucket in the exported latency distribution (μs boundaries).
#[derive(Debug, Clone, Serialize)]
pub struct DistBucket {
    pub range_start_us: u64,
    pub range_end_us: u64,
    pub count: u64,
}

#[derive(Debug)]
pub enum MonitorError {
    ResetDisabledInProduction,
}

impl fmt::Display for MonitorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ResetDisabledInProduction => {
                write!(f, "metrics reset is disabled in production mode")
            }
        }
    }
}

impl std::error::Error for MonitorError {}

// ─── Internal state ──────────────────────────────────────────────

struct EndpointStats {
    total_requests: u64,
    slow_requests: u64,
    total_time_ms: f64,
    error_count: u64,
    window: PercentileWindow,
}

impl EndpointStats {
    fn new() -> Self {
        Self {
            total_requests: 0,
            slow_requests: 0,
            total_time_ms: 0.0,
            error_count: 0,
            window: PercentileWindow::new(RECENT_WINDOW),
        }
    }

    fn view(&self) -> EndpointStatsView {
        EndpointStatsView {
            total_requests: self.total_requests,
            slow_requests: self.slow_requests,
            total_time_ms: self.total_time_ms,
            avg_time_ms: if self.total_requests > 0 {
                self.total_time_ms / self.total_requests as f64
            } else {
                0.0
            },
            p95_ms: self.window.percentile(95.0),
            p99_ms: self.window.percentile(99.0),
            error_count: self.error_count,
        }
    }
}

struct InFlightRequest {
    endpoint: String,
    method: String,
    rss_before: u64,
    started: Instant,
    completed: Option<Instant>,
}

// ─── PerformanceMonitor ──────────────────────────────────────────

/// Always-on request instrumentation: true durations, memory deltas,
/// per-endpoint aggregates, SLA watching.
///
/// Every path through this type is fail-open — a request outcome is never
/// changed by its own measurement. Constructed once at bootstrap and shared
/// via `Arc`, so tests get isolated instances instead of process globals.
pub struct PerformanceMonitor {
    config: RuntimeConfig,
    critical: HashSet<String>,
    memory: Option<MemoryProbe>,
    stats: Mutex<HashMap<String, EndpointStats>>,
    in_flight: Mutex<HashMap<String, InFlightRequest>>,
    distribution: Mutex<Histogram<u64>>,
}

impl PerformanceMonitor {
    pub fn new(config: RuntimeConfig) -> Self {
        let critical = config.critical_endpoints.iter().cloned().collect();
        Self {
            critical,
            memory: MemoryProbe::new(),
            stats: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
            distribution: Mutex::new(new_histogram()),
            config,
        }
    }

    /// Registers an in-flight record and returns the endpoint key the
    /// request will aggregate under.
    pub fn begin(&self, correlation_id: &str, method: &axum::http::Method, path: &str) -> String {
        let endpoint = endpoint_key(method, path);
        let rss_before = self.memory.as_ref().map_or(0, MemoryProbe::rss_bytes);

        let mut in_flight = self.in_flight.lock();
        if in_flight.len() >= MAX_IN_FLIGHT {
            evict_one(&mut in_flight);
        }
        in_flight.insert(
            correlation_id.to_owned(),
            InFlightRequest {
                endpoint: endpoint.clone(),
                method: method.to_string(),
                rss_before,
                started: Instant::now(),
                completed: None,
            },
        );
        endpoint
    }

    /// Completion hook: computes true duration and memory delta from the
    /// in-flight record and folds them into the aggregates. The record
    /// stays behind (stamped) for delayed correlation lookups until the
    /// sweep retires it.
    pub fn complete(&self, correlation_id: &str, status: StatusCode) -> Option<EndpointPerformanceSample> {
        let rss_after = self.memory.as_ref().map_or(0, MemoryProbe::rss_bytes);

        let (endpoint, method, true_ms, memory_delta) = {
            let mut in_flight = self.in_flight.lock();
            let record = in_flight.get_mut(correlation_id)?;
            record.completed = Some(Instant::now());
            (
                record.endpoint.clone(),
                record.method.clone(),
                record.started.elapsed().as_secs_f64() * 1000.0,
                rss_after as i64 - record.rss_before as i64,
            )
        };

        Some(self.observe(&endpoint, &method, status.as_u16(), true_ms, memory_delta))
    }

    /// Classifies and records one observation. Split out from `complete`
    /// so the aggregation rules can be exercised with synthetic durations.
    pub fn observe(
        &self,
        endpoint: &str,
        method: &str,
        status: u16,
        true_ms: f64,
        memory_delta_bytes: i64,
    ) -> EndpointPerformanceSample {
        let is_critical = self.critical.contains(endpoint);
        let threshold = if is_critical {
            self.config.critical_slow_ms
        } else {
            self.config.slow_request_ms
        };
        let is_slow = true_ms > threshold;
        let is_error = status >= 400;

        {
            let mut stats = self.stats.lock();
            let entry = stats
                .entry(endpoint.to_owned())
                .or_insert_with(EndpointStats::new);
            entry.total_requests += 1;
            entry.total_time_ms += true_ms;
            if is_slow {
                entry.slow_requests += 1;
            }
            if is_error {
                entry.error_count += 1;
            }
            entry.window.observe(true_ms);
        }

        {
            let micros = ((true_ms * 1000.0) as u64).clamp(HIST_LOW, HIST_HIGH);
            let _ = self.distribution.lock().record(micros);
        }

        if is_slow || is_critical {
            warn!(
                endpoint,
                duration_ms = true_ms.round(),
                threshold_ms = threshold,
                memory_delta_bytes,
                status,
                critical = is_critical,
                slow = is_slow,
                "request exceeded watch thresholds"
            );
        }

        EndpointPerformanceSample {
            endpoint: endpoint.to_owned(),
            method: method.to_owned(),
            true_duration_ms: true_ms,
            memory_delta_bytes,
            is_slow,
            is_critical,
            status,
            timestamp: Utc::now(),
        }
    }

    /// Full report for the admin surface.
    pub fn stats(&self) -> PerformanceReport {
        let stats = self.stats.lock();

        let mut endpoints = HashMap::with_capacity(stats.len());
        let mut total_requests = 0u64;
        let mut slow_requests = 0u64;
        let mut total_time_ms = 0.0f64;
        let mut worst: Option<(String, f64)> = None;
        let mut breaching = Vec::new();

        for (key, endpoint_stats) in stats.iter() {
            let view = endpoint_stats.view();
            total_requests += view.total_requests;
            slow_requests += view.slow_requests;
            total_time_ms += view.total_time_ms;

            if worst.as_ref().map_or(true, |(_, avg)| view.avg_time_ms > *avg) {
                worst = Some((key.clone(), view.avg_time_ms));
            }
            if self.critical.contains(key) && view.p95_ms > self.config.p95_target_ms {
                breaching.push(format!("{key} (P95: {:.0}ms)", view.p95_ms));
            }

            endpoints.insert(key.clone(), view);
        }
        breaching.sort();

        PerformanceReport {
            endpoints,
            summary: PerformanceSummary {
                total_requests,
                slow_requests,
                worst_endpoint: worst.map(|(key, _)| key),
                avg_response_time_ms: if total_requests > 0 {
                    total_time_ms / total_requests as f64
                } else {
                    0.0
                },
                critical_breaching_sla: breaching,
            },
        }
    }

    /// Bucketed view of the process-wide true-duration histogram, for the
    /// dashboard's distribution chart. Empty buckets are skipped.
    pub fn distribution(&self) -> Vec<DistBucket> {
        const BOUNDARIES: &[u64] = &[
            1_000, 2_500, 5_000, 10_000, 25_000, 50_000, 100_000, 250_000, 500_000, 1_000_000,
            2_500_000, 5_000_000,
        ];

        let hist = self.distribution.lock();
        if hist.len() == 0 {
            return Vec::new();
        }

        let mut counts = vec![0u64; BOUNDARIES.len() + 1];
        for iv in hist.iter_recorded() {
            let idx = match BOUNDARIES.binary_search(&iv.value_iterated_to()) {
                Ok(i) | Err(i) => i.min(BOUNDARIES.len()),
            };
            counts[idx] += iv.count_at_value();
        }

        let mut result = Vec::with_capacity(counts.len());
        let mut prev = 0u64;
        for (i, &boundary) in BOUNDARIES.iter().enumerate() {
            if counts[i] > 0 {
                result.push(DistBucket {
                    range_start_us: prev,
                    range_end_us: boundary,
                    count: counts[i],
                });
            }
            prev = boundary;
        }
        if counts[BOUNDARIES.len()] > 0 {
            result.push(DistBucket {
                range_start_us: prev,
                range_end_us: hist.max(),
                count: counts[BOUNDARIES.len()],
            });
        }
        result
    }

    /// Drops expired in-flight records: completed ones past the grace
    /// period, plus anything started so long ago that its completion hook
    /// can no longer fire. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let grace = self.config.inflight_grace;
        let mut in_flight = self.in_flight.lock();
        let before = in_flight.len();
        in_flight.retain(|_, record| match record.completed {
            Some(at) => at.elapsed() <= grace,
            None => record.started.elapsed() <= grace * 10,
        });
        before - in_flight.len()
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Clears every aggregate. Refused outright in production mode.
    pub fn reset(&self) -> Result<(), MonitorError> {
        if self.config.production {
            return Err(MonitorError::ResetDisabledInProduction);
        }
        self.stats.lock().clear();
        self.in_flight.lock().clear();
        *self.distribution.lock() = new_histogram();
        Ok(())
    }
}

fn new_histogram() -> Histogram<u64> {
    Histogram::new_with_bounds(HIST_LOW, HIST_HIGH, HIST_SIGFIG).expect("histogram creation")
}

/// Prefers retiring an already-completed record; falls back to the oldest.
fn evict_one(in_flight: &mut HashMap<String, InFlightRequest>) {
    let victim = in_flight
        .iter()
        .filter(|(_, r)| r.completed.is_some())
        .min_by_key(|(_, r)| r.completed)
        .or_else(|| in_flight.iter().min_by_key(|(_, r)| r.started))
        .map(|(k, _)| k.clone());
    if let Some(key) = victim {
        in_flight.remove(&key);
    }
}

// ─── Middleware ──────────────────────────────────────────────────

/// Inner layer of the instrumentation stack, mounted on every route.
/// Measures true processing time only — any normalization delay is added
/// by an outer layer after this hook has already recorded its sample.
pub async fn monitor_requests(
    State(monitor): State<Arc<PerformanceMonitor>>,
    req: Request,
    next: Next,
) -> Response {
    let correlation_id = req
        .headers()
        .get(CORRELATION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let method = req.method().clone();
    let path = req.uri().path().to_owned();
    monitor.begin(&correlation_id, &method, &path);

    let mut response = next.run(req).await;

    monitor.complete(&correlation_id, response.status());

    // echo the id for log cross-referencing; never echo timing values,
    // which are exactly what the normalizer hides
    if let Ok(value) = HeaderValue::from_str(&correlation_id) {
        response.headers_mut().insert(CORRELATION_HEADER, value);
    }

    response
}
