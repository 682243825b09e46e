use axum::{
    middleware as axum_mw,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::metrics::endpoint;
use crate::middleware::{context, timing};
use crate::AppState;

/// Every path an InfluxDB client may post line protocol to. All behave the
/// same; the v1 and v2 query parameters other than `precision` are ignored.
pub const WRITE_PATHS: [&str; 3] = ["/api/v1/push/influx/write", "/api/v2/write", "/write"];

/// Builds the full Axum `Router` with all routes and middleware.
pub fn create_router(state: Arc<AppState>) -> Router {
    let mut router: Router<Arc<AppState>> = Router::new();

    // ── Write endpoints ─────────────────────────────────────────
    for path in WRITE_PATHS {
        router = router.route(path, post(handlers::write::write_influx));
    }

    router
        // ── Metrics / health ────────────────────────────────────
        .route("/api/metrics", get(endpoint::get_metrics))
        .route("/ready", get(handlers::ready))
        // ── Global middleware (applied bottom-up) ───────────────
        .layer(axum_mw::from_fn_with_state(
            state.clone(),
            timing::timing_middleware,
        ))
        .layer(axum_mw::from_fn(context::request_context))
        .layer(TraceLayer::new_for_http())
        // ── Provide shared state to all routes above ────────────
        .with_state(state)
}
