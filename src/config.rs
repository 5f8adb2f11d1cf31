use std::time::Duration;

/// Process-wide runtime knobs, resolved once at bootstrap.
///
/// One constraint worth stating: every registered timing baseline plus its
/// jitter amplitude must stay comfortably under the host's request timeout,
/// or the injected delay will push otherwise-healthy requests into timeout
/// territory.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Production mode locks down destructive admin operations (reset).
    pub production: bool,

    /// Requests slower than this are flagged slow on ordinary endpoints.
    pub slow_request_ms: f64,
    /// Stricter threshold applied to endpoints in the critical set.
    pub critical_slow_ms: f64,
    /// A critical endpoint whose current P95 exceeds this breaches SLA.
    pub p95_target_ms: f64,

    /// Endpoint keys (`METHOD:/normalized/path`) watched under the
    /// stricter threshold and the SLA target.
    pub critical_endpoints: Vec<String>,

    /// How long completed in-flight records stay queryable after the
    /// response went out.
    pub inflight_grace: Duration,
    /// Cadence of the background sweep that drops expired records.
    pub sweep_interval: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            production: false,
            slow_request_ms: 1000.0,
            critical_slow_ms: 500.0,
            p95_target_ms: 500.0,
            critical_endpoints: vec![
                "GET:/api/accounts/:id".to_owned(),
                "POST:/api/accounts".to_owned(),
                "POST:/api/auth/login".to_owned(),
            ],
            inflight_grace: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(30),
        }
    }
}

/// `APP_ENV=production` flips the production guard; everything else keeps
/// the defaults.
pub fn from_env() -> RuntimeConfig {
    RuntimeConfig {
        production: std::env::var("APP_ENV").as_deref() == Ok("production"),
        ..RuntimeConfig::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_not_production() {
        let config = RuntimeConfig::default();
        assert!(!config.production);
        assert!(config.critical_slow_ms < config.slow_request_ms);
    }
}
