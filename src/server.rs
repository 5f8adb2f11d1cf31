use axum::{
    middleware as axum_mw,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::handlers;
use crate::monitor;
use crate::timing;
use crate::AppState;

/// Builds the full Axum `Router`: demo surface, admin surface, and the
/// two instrumentation layers.
///
/// Layer order matters and is part of the design: layers apply bottom-up,
/// so the performance monitor sits closest to the handlers and the timing
/// normalizer wraps it. On the response path the monitor therefore records
/// true processing time before the normalizer's delay exists, and the
/// delay is the final step before bytes leave the process.
pub fn create_router(state: Arc<AppState>) -> Router {
    let monitor = state.monitor.clone();
    let normalizer = state.normalizer.clone();

    Router::new()
        // ── Demo endpoints under timing protection ──────────────
        .route("/api/accounts/:id", get(handlers::accounts::get_account))
        .route("/api/accounts", post(handlers::accounts::create_account))
        .route("/api/auth/login", post(handlers::auth::login))
        // ── Metrics query surface ───────────────────────────────
        .route(
            "/api/admin/performance/stats",
            get(handlers::admin::performance_stats),
        )
        .route(
            "/api/admin/performance/reset",
            post(handlers::admin::reset_metrics),
        )
        .route(
            "/api/admin/timing/metrics",
            get(handlers::admin::timing_metrics),
        )
        .route(
            "/api/admin/timing/config",
            get(handlers::admin::timing_config),
        )
        .route(
            "/api/admin/timing/selftest",
            post(handlers::admin::timing_selftest),
        )
        .route(
            "/api/admin/metrics/stream",
            get(handlers::admin::metrics_stream),
        )
        // ── Provide shared state to all routes above ────────────
        .with_state(state)
        // ── Instrumentation (applied bottom-up) ─────────────────
        .layer(axum_mw::from_fn_with_state(
            monitor,
            monitor::monitor_requests,
        ))
        .layer(axum_mw::from_fn_with_state(
            normalizer,
            timing::normalize_timing,
        ))
        .layer(CorsLayer::permissive())
}
