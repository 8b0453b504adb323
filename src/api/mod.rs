//! HTTP adapter over the lifecycle services.

pub mod charges;
pub mod notifications;

use crate::health::{HealthChecker, HealthState};
use crate::services::{
    CardAuthoriseService, CardCaptureService, ChargeCancelService, ChargeRefundService,
    ChargeService, NotificationReconciler,
};
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub charges: Arc<ChargeService>,
    pub authorise: Arc<CardAuthoriseService>,
    pub captures: Arc<CardCaptureService>,
    pub cancels: Arc<ChargeCancelService>,
    pub refunds: Arc<ChargeRefundService>,
    pub reconciler: Arc<NotificationReconciler>,
    pub health: HealthChecker,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/health/live", get(liveness))
        .route("/v1/api/charges", post(charges::create_charge))
        .route("/v1/api/charges/{id}", get(charges::get_charge))
        .route("/v1/api/charges/{id}/capture", post(charges::approve_capture))
        .route("/v1/api/charges/{id}/cancel", post(charges::system_cancel))
        .route("/v1/api/charges/{id}/refunds", post(charges::refund))
        .route(
            "/v1/frontend/charges/{id}/card-entry",
            post(charges::start_card_entry),
        )
        .route("/v1/frontend/charges/{id}/cards", post(charges::authorise_card))
        .route("/v1/frontend/charges/{id}/3ds", post(charges::authorise_3ds))
        .route("/v1/frontend/charges/{id}/cancel", post(charges::user_cancel))
        .route(
            "/v1/api/notifications/{gateway}",
            post(notifications::receive_notification),
        )
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.health.check_health().await;
    let code = match status.status {
        HealthState::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        HealthState::Healthy | HealthState::Degraded => StatusCode::OK,
    };
    (code, Json(status))
}

async fn liveness() -> &'static str {
    "OK"
}
