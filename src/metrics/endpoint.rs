use axum::{extract::State, Json};
use std::sync::Arc;

use super::collector::MetricsSnapshot;
use crate::AppState;

// ─── GET /api/metrics ────────────────────────────────────────────

/// Current recorder snapshot as JSON.
pub async fn get_metrics(State(state): State<Arc<AppState>>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}
