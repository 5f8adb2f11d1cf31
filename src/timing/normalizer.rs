use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{Request, State};
use axum::http::Method;
use axum::middleware::Next;
use axum::response::Response;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, error};

use super::jitter::secure_jitter;
use super::policy::{PolicyError, PolicySet, TimingPolicy};
use super::window::percentile_sorted;
use crate::monitor::endpoint::normalize_path;

/// Completed-request record kept by the normalizer for its own statistics.
#[derive(Debug, Clone, Serialize)]
pub struct RequestTimingSample {
    /// Normalized path (`/api/accounts/:id`), not the concrete URI.
    pub endpoint: String,
    pub method: String,
    pub status: u16,
    /// Wall time spent actually producing the response.
    pub actual_ms: f64,
    pub injected_delay_ms: f64,
    /// What the client observes: `actual + injected`.
    pub total_ms: f64,
    pub timestamp: DateTime<Utc>,
}

const MAX_SAMPLE_HISTORY: usize = 10_000;

/// Reshapes the externally observable latency of policy-covered endpoints
/// to `baseline ± jitter`, hiding how long the work really took.
///
/// The delay is one-directional: a request already slower than its target
/// passes through untouched. Defeating an attacker when true processing is
/// consistently slower than the baseline is out of reach by construction,
/// which is why baselines are chosen above the endpoint's own P99.
pub struct TimingNormalizer {
    policies: RwLock<PolicySet>,
    history: Mutex<VecDeque<RequestTimingSample>>,
}

impl TimingNormalizer {
    pub fn new() -> Self {
        Self {
            policies: RwLock::new(PolicySet::new()),
            history: Mutex::new(VecDeque::with_capacity(1024)),
        }
    }

    /// Registers or replaces a policy. Startup-time only; a bad pattern is
    /// a configuration error that should abort the boot.
    pub fn set_policy(&self, pattern: &str, policy: TimingPolicy) -> Result<(), PolicyError> {
        self.policies.write().set_policy(pattern, policy)
    }

    pub fn resolve(&self, method: &Method, path: &str) -> TimingPolicy {
        self.policies.read().resolve(method, path).clone()
    }

    /// Registered `(pattern, policy)` pairs in match order, default last.
    pub fn policy_table(&self) -> Vec<(String, TimingPolicy)> {
        self.policies
            .read()
            .iter()
            .map(|(pattern, policy)| (pattern.to_owned(), policy.clone()))
            .collect()
    }

    fn record(&self, sample: RequestTimingSample) {
        let mut history = self.history.lock();
        history.push_back(sample);
        if history.len() > MAX_SAMPLE_HISTORY {
            history.pop_front();
        }
    }

    pub fn sample_count(&self) -> usize {
        self.history.lock().len()
    }

    /// Most recent `n` samples, oldest first.
    pub fn recent_samples(&self, n: usize) -> Vec<RequestTimingSample> {
        let history = self.history.lock();
        let skip = history.len().saturating_sub(n);
        history.iter().skip(skip).cloned().collect()
    }

    /// Percentile breakdown of actual vs. observed time, optionally
    /// restricted to one normalized endpoint.
    pub fn statistics(&self, endpoint: Option<&str>) -> TimingStatistics {
        let (mut actual, mut total): (Vec<f64>, Vec<f64>) = {
            let history = self.history.lock();
            history
                .iter()
                .filter(|s| endpoint.map_or(true, |e| s.endpoint == e))
                .map(|s| (s.actual_ms, s.total_ms))
                .unzip()
        };

        if actual.is_empty() {
            return TimingStatistics {
                count: 0,
                actual_time: None,
                total_time: None,
            };
        }

        actual.sort_by(|a, b| a.partial_cmp(b).expect("duration is never NaN"));
        total.sort_by(|a, b| a.partial_cmp(b).expect("duration is never NaN"));

        TimingStatistics {
            count: actual.len(),
            actual_time: Some(TimeStats::from_sorted(&actual)),
            total_time: Some(TimeStats::from_sorted(&total)),
        }
    }

    /// Heuristic check that normalization is actually flattening the
    /// signal: a wide spread in actual times is expected, that spread
    /// surviving into the observed totals is not.
    pub fn assess_vulnerability(&self, stats: &TimingStatistics) -> VulnerabilityAssessment {
        let (Some(actual), Some(total)) = (&stats.actual_time, &stats.total_time) else {
            return VulnerabilityAssessment::low("no samples recorded yet");
        };
        if stats.count <= 100 {
            return VulnerabilityAssessment::low("insufficient samples for spread analysis");
        }

        let actual_spread = actual.p99 - actual.p50;
        let total_spread = total.p99 - total.p50;

        if actual_spread > 10.0 && total_spread < 5.0 {
            // real variance absorbed by the delay; report the numbers
            VulnerabilityAssessment {
                is_vulnerable: false,
                risk_level: "LOW",
                details: format!(
                    "actual spread {actual_spread:.2}ms absorbed to {total_spread:.2}ms observed"
                ),
            }
        } else if actual_spread > 10.0 && total_spread > 10.0 {
            VulnerabilityAssessment {
                is_vulnerable: true,
                risk_level: "HIGH",
                details: format!(
                    "actual spread {actual_spread:.2}ms leaking into observed spread {total_spread:.2}ms — raise baselines"
                ),
            }
        } else if actual_spread > 5.0 {
            VulnerabilityAssessment {
                is_vulnerable: false,
                risk_level: "MEDIUM",
                details: format!("moderate actual spread {actual_spread:.2}ms"),
            }
        } else {
            VulnerabilityAssessment::low("observed timing flat")
        }
    }

    /// Drops the sample history. Invoked by the administrative reset.
    pub fn reset(&self) {
        self.history.lock().clear();
    }
}

impl Default for TimingNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TimeStats {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

impl TimeStats {
    fn from_sorted(sorted: &[f64]) -> Self {
        Self {
            min: sorted[0],
            max: sorted[sorted.len() - 1],
            avg: sorted.iter().sum::<f64>() / sorted.len() as f64,
            p50: percentile_sorted(sorted, 50.0),
            p95: percentile_sorted(sorted, 95.0),
            p99: percentile_sorted(sorted, 99.0),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TimingStatistics {
    pub count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual_time: Option<TimeStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_time: Option<TimeStats>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VulnerabilityAssessment {
    pub is_vulnerable: bool,
    pub risk_level: &'static str,
    pub details: String,
}

impl VulnerabilityAssessment {
    fn low(details: &str) -> Self {
        Self {
            is_vulnerable: false,
            risk_level: "LOW",
            details: details.to_owned(),
        }
    }
}

// ─── Middleware ──────────────────────────────────────────────────

/// Outer layer of the instrumentation stack. Holds the finished response
/// until the target latency is reached, then lets it flush.
///
/// Mount this *outside* the performance monitor: the monitor's completion
/// hook then runs before the sleep, keeping true-duration metrics free of
/// injected delay, and the delay stays the last step before bytes leave
/// the process. If the client disconnects mid-delay the whole future is
/// dropped — no write to a dead connection is ever attempted.
pub async fn normalize_timing(
    State(normalizer): State<Arc<TimingNormalizer>>,
    req: Request,
    next: Next,
) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_owned();

    let policy = normalizer.resolve(&method, &path);
    if !policy.enabled {
        return next.run(req).await;
    }

    let start = Instant::now();
    let response = next.run(req).await;
    let actual_ms = start.elapsed().as_secs_f64() * 1000.0;

    // Entropy failure: pass the response through undelayed and log it as
    // an error. Timing protection is off for this request.
    let delay_ms = match secure_jitter(policy.jitter_range_ms) {
        Ok(jitter) => (policy.baseline_ms + jitter - actual_ms).max(0.0).round(),
        Err(err) => {
            error!(
                %err, method = %method, path = %path,
                "entropy source unavailable — response sent without timing normalization"
            );
            0.0
        }
    };

    if delay_ms > 0.0 {
        tokio::time::sleep(Duration::from_millis(delay_ms as u64)).await;
    }

    debug!(
        method = %method, path = %path,
        actual_ms, delay_ms, "timing normalized"
    );

    normalizer.record(RequestTimingSample {
        endpoint: normalize_path(&path),
        method: method.to_string(),
        status: response.status().as_u16(),
        actual_ms,
        injected_delay_ms: delay_ms,
        total_ms: actual_ms + delay_ms,
        timestamp: Utc::now(),
    });

    // status, headers and body are returned untouched
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(endpoint: &str, actual: f64, delay: f64) -> RequestTimingSample {
        RequestTimingSample {
            endpoint: endpoint.to_owned(),
            method: "GET".to_owned(),
            status: 200,
            actual_ms: actual,
            injected_delay_ms: delay,
            total_ms: actual + delay,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn history_is_capped_fifo() {
        let normalizer = TimingNormalizer::new();
        for i in 0..(MAX_SAMPLE_HISTORY + 50) {
            normalizer.record(sample("/api/x", i as f64, 0.0));
        }
        assert_eq!(normalizer.sample_count(), MAX_SAMPLE_HISTORY);
        // the 50 oldest samples were evicted
        let oldest = normalizer.recent_samples(MAX_SAMPLE_HISTORY)[0].actual_ms;
        assert_eq!(oldest, 50.0);
    }

    #[test]
    fn statistics_filter_by_endpoint() {
        let normalizer = TimingNormalizer::new();
        normalizer.record(sample("/api/a", 10.0, 15.0));
        normalizer.record(sample("/api/a", 20.0, 5.0));
        normalizer.record(sample("/api/b", 99.0, 0.0));

        let all = normalizer.statistics(None);
        assert_eq!(all.count, 3);

        let a_only = normalizer.statistics(Some("/api/a"));
        assert_eq!(a_only.count, 2);
        let actual = a_only.actual_time.unwrap();
        assert_eq!(actual.min, 10.0);
        assert_eq!(actual.max, 20.0);
        assert_eq!(actual.avg, 15.0);
        let total = a_only.total_time.unwrap();
        assert_eq!(total.min, 25.0);
        assert_eq!(total.max, 25.0);
    }

    #[test]
    fn empty_statistics_have_count_zero() {
        let normalizer = TimingNormalizer::new();
        let stats = normalizer.statistics(None);
        assert_eq!(stats.count, 0);
        assert!(stats.actual_time.is_none());
    }

    #[test]
    fn wide_actual_spread_with_flat_totals_reads_as_protected() {
        let normalizer = TimingNormalizer::new();
        // actual times all over the place, totals normalized to ~50ms
        for i in 0..150 {
            let actual = 2.0 + (i % 40) as f64;
            normalizer.record(sample("/api/a", actual, 50.0 - actual));
        }
        let stats = normalizer.statistics(None);
        let assessment = normalizer.assess_vulnerability(&stats);
        assert!(!assessment.is_vulnerable);
        assert_eq!(assessment.risk_level, "LOW");
    }

    #[test]
    fn leaking_spread_reads_as_high_risk() {
        let normalizer = TimingNormalizer::new();
        // no delay at all: observed spread == actual spread
        for i in 0..150 {
            let actual = 2.0 + (i % 40) as f64;
            normalizer.record(sample("/api/a", actual, 0.0));
        }
        let stats = normalizer.statistics(None);
        let assessment = normalizer.assess_vulnerability(&stats);
        assert!(assessment.is_vulnerable);
        assert_eq!(assessment.risk_level, "HIGH");
    }

    #[test]
    fn reset_clears_history() {
        let normalizer = TimingNormalizer::new();
        normalizer.record(sample("/api/a", 1.0, 2.0));
        normalizer.reset();
        assert_eq!(normalizer.sample_count(), 0);
    }
}
