use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use potholer_core::PendingReportStore;
use serde::Serialize;

#[derive(Clone)]
pub struct HealthState {
    store: Arc<dyn PendingReportStore>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub pending_reports: usize,
    pub checked_at: String,
}

pub fn router(store: Arc<dyn PendingReportStore>) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { store })
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let payload = HealthResponse {
        status: "ready",
        service: HealthCheck {
            status: "ready",
            detail: "potholer-server webhook listener initialized".to_string(),
        },
        pending_reports: state.store.pending_count().await,
        checked_at: Utc::now().to_rfc3339(),
    };

    (StatusCode::OK, Json(payload))
}
