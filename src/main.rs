use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use timing_shield::timing::{PolicyError, TimingNormalizer, TimingPolicy};
use timing_shield::{config, handlers, server, AppState};

/// Per-route timing targets. Baselines sit above each endpoint's expected
/// P99 so the "never speed up, only slow down" rule has room to work.
fn register_default_policies(normalizer: &TimingNormalizer) -> Result<(), PolicyError> {
    normalizer.set_policy("/api/accounts/:id", TimingPolicy::new(25.0, 5.0))?;
    normalizer.set_policy("/api/accounts/:id/status", TimingPolicy::new(30.0, 5.0))?;
    normalizer.set_policy("/api/auth/*", TimingPolicy::new(100.0, 20.0))?;
    normalizer.set_policy("/api/admin/*", TimingPolicy::new(20.0, 4.0))?;
    normalizer.set_policy("default", TimingPolicy::new(15.0, 3.0))?;
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = config::from_env();
    let state = Arc::new(AppState::new(config.clone()));

    // Policies are a startup concern: a pattern that does not compile
    // aborts the boot instead of throwing on every request.
    if let Err(err) = register_default_policies(&state.normalizer) {
        eprintln!("invalid timing policy configuration: {err}");
        std::process::exit(1);
    }

    handlers::accounts::seed(&state);
    handlers::auth::seed(&state);

    // Background sweep retiring expired in-flight records.
    {
        let monitor = state.monitor.clone();
        let mut ticker = tokio::time::interval(config.sweep_interval);
        tokio::spawn(async move {
            loop {
                ticker.tick().await;
                let removed = monitor.sweep();
                if removed > 0 {
                    tracing::debug!(removed, "swept expired in-flight records");
                }
            }
        });
    }

    let app = server::create_router(state);

    let addr = "0.0.0.0:3000";
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to port 3000 — is it already in use?");

    info!(%addr, production = config.production, "timing-shield listening");
    info!("performance stats  → http://localhost:3000/api/admin/performance/stats");
    info!("timing metrics     → http://localhost:3000/api/admin/timing/metrics");
    info!("metrics SSE        → http://localhost:3000/api/admin/metrics/stream");

    axum::serve(listener, app)
        .await
        .expect("Server exited with error");
}
