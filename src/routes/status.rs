//! Status routes: datasource health and version.

use crate::health::HealthReport;
use crate::state::AppState;
use axum::{extract::State, http::StatusCode, routing::get, Json, Router};

async fn status(State(state): State<AppState>) -> (StatusCode, Json<HealthReport>) {
    let report = state.health.report().await;
    let code = if report.is_up() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(report))
}

async fn version() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// GET /status, GET /healthz (health report, 503 when a component is down), GET /version.
pub fn status_routes(state: AppState) -> Router {
    Router::new()
        .route("/status", get(status))
        .route("/healthz", get(status))
        .route("/version", get(version))
        .with_state(state)
}
