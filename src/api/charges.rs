//! Charge lifecycle endpoints
//!
//! Frontend routes are what the payment page calls on behalf of the payer;
//! API routes are what the merchant calls.

use crate::api::AppState;
use crate::charges::{Charge, ChargeStatus};
use crate::error::{ChargeError, ChargeResult};
use crate::payments::types::CardDetails;
use crate::services::{AuthorisationResult, NewCharge, RefundResult};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargeResponse {
    pub charge_id: String,
    pub amount: i64,
    pub status: ChargeStatus,
    pub reference: String,
    pub description: String,
    pub delayed_capture: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway_transaction_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<Charge> for ChargeResponse {
    fn from(charge: Charge) -> Self {
        Self {
            charge_id: charge.external_id,
            amount: charge.amount,
            status: charge.status,
            reference: charge.reference,
            description: charge.description,
            delayed_capture: charge.delayed_capture,
            gateway_transaction_id: charge.gateway_transaction_id,
            created_at: charge.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ChallengeResponseBody {
    pub challenge_response: String,
}

#[derive(Debug, Deserialize)]
pub struct RefundBody {
    pub amount: i64,
    /// Amount the caller believes is still refundable.
    pub refund_amount_available: Option<i64>,
}

// ============================================================================
// API routes
// ============================================================================

/// POST /v1/api/charges
pub async fn create_charge(
    State(state): State<AppState>,
    Json(body): Json<NewCharge>,
) -> ChargeResult<(StatusCode, Json<ChargeResponse>)> {
    let charge = state.charges.create(body).await?;
    Ok((StatusCode::CREATED, Json(charge.into())))
}

/// GET /v1/api/charges/{id}
pub async fn get_charge(
    State(state): State<AppState>,
    Path(charge_id): Path<String>,
) -> ChargeResult<Json<ChargeResponse>> {
    Ok(Json(state.charges.get(&charge_id).await?.into()))
}

/// POST /v1/api/charges/{id}/capture
pub async fn approve_capture(
    State(state): State<AppState>,
    Path(charge_id): Path<String>,
) -> ChargeResult<Json<ChargeResponse>> {
    info!(charge_external_id = %charge_id, "capture requested");
    Ok(Json(state.captures.approve_capture(&charge_id).await?.into()))
}

/// POST /v1/api/charges/{id}/cancel
pub async fn system_cancel(
    State(state): State<AppState>,
    Path(charge_id): Path<String>,
) -> ChargeResult<Json<ChargeResponse>> {
    Ok(Json(state.cancels.system_cancel(&charge_id).await?.into()))
}

/// POST /v1/api/charges/{id}/refunds
pub async fn refund(
    State(state): State<AppState>,
    Path(charge_id): Path<String>,
    Json(body): Json<RefundBody>,
) -> ChargeResult<(StatusCode, Json<RefundResult>)> {
    let result = state
        .refunds
        .refund(&charge_id, body.amount, body.refund_amount_available)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(result)))
}

// ============================================================================
// Frontend routes
// ============================================================================

/// POST /v1/frontend/charges/{id}/card-entry
pub async fn start_card_entry(
    State(state): State<AppState>,
    Path(charge_id): Path<String>,
) -> ChargeResult<Json<ChargeResponse>> {
    Ok(Json(state.charges.start_card_entry(&charge_id).await?.into()))
}

/// POST /v1/frontend/charges/{id}/cards
pub async fn authorise_card(
    State(state): State<AppState>,
    Path(charge_id): Path<String>,
    Json(card): Json<CardDetails>,
) -> ChargeResult<Json<AuthorisationResult>> {
    if card.card_number.trim().is_empty() {
        return Err(ChargeError::Validation {
            message: "card_number is required".to_string(),
        });
    }
    let result = state.authorise.authorise(&charge_id, card).await?;

    // Delayed-capture charges wait for the merchant; others are approved
    // for the capture sweep straight away.
    if result.status == ChargeStatus::AuthorisationSuccess {
        let charge = state.charges.get(&charge_id).await?;
        if charge.delayed_capture {
            state.captures.mark_awaiting_capture_request(&charge_id).await?;
        } else {
            state.captures.approve_capture(&charge_id).await?;
        }
    }
    Ok(Json(result))
}

/// POST /v1/frontend/charges/{id}/3ds
pub async fn authorise_3ds(
    State(state): State<AppState>,
    Path(charge_id): Path<String>,
    Json(body): Json<ChallengeResponseBody>,
) -> ChargeResult<Json<AuthorisationResult>> {
    let result = state
        .authorise
        .authorise_challenge_response(&charge_id, &body.challenge_response)
        .await?;
    if result.status == ChargeStatus::AuthorisationSuccess {
        let charge = state.charges.get(&charge_id).await?;
        if charge.delayed_capture {
            state.captures.mark_awaiting_capture_request(&charge_id).await?;
        } else {
            state.captures.approve_capture(&charge_id).await?;
        }
    }
    Ok(Json(result))
}

/// POST /v1/frontend/charges/{id}/cancel
pub async fn user_cancel(
    State(state): State<AppState>,
    Path(charge_id): Path<String>,
) -> ChargeResult<Json<ChargeResponse>> {
    Ok(Json(state.cancels.user_cancel(&charge_id).await?.into()))
}
