use crate::infra::AppState;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use chrono::Utc;
use escrow_engine::error::AppError;
use escrow_engine::escrow::{escrow_router, EscrowService, LedgerStore, SweepReport};
use serde_json::json;
use std::sync::Arc;

pub(crate) fn with_escrow_routes<L>(service: Arc<EscrowService<L>>) -> Router
where
    L: LedgerStore + 'static,
{
    let operations = Router::new()
        .route("/api/v1/escrow/sweeps", post(sweep_endpoint::<L>))
        .with_state(service.clone());

    escrow_router(service)
        .merge(operations)
        .route("/health", get(healthcheck))
        .route("/ready", get(readiness_endpoint))
        .route("/metrics", get(metrics_endpoint))
}

pub(crate) async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub(crate) async fn readiness_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let ready = state.readiness.load(std::sync::atomic::Ordering::Relaxed);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let payload = if ready {
        json!({ "status": "ready" })
    } else {
        json!({ "status": "initializing" })
    };

    (status, Json(payload))
}

pub(crate) async fn metrics_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

/// Run the review-window sweep now instead of waiting for the background tick.
pub(crate) async fn sweep_endpoint<L>(
    State(service): State<Arc<EscrowService<L>>>,
) -> Result<Json<SweepReport>, AppError>
where
    L: LedgerStore + 'static,
{
    let report = service.release_elapsed_reviews(Utc::now())?;
    Ok(Json(report))
}
