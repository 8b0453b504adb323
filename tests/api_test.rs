mod common;

use axum::body::Body;
use axum::extract::connect_info::MockConnectInfo;
use axum::http::{Request, StatusCode};
use axum::Router;
use charge_connector::api::{router, AppState};
use charge_connector::charges::ChargeStatus;
use charge_connector::health::HealthChecker;
use charge_connector::services::{ChargeService, GatewayOperationExecutor, LifecycleConfig};
use common::{Harness, StaticResolver, ACCOUNT_ID};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower::util::ServiceExt;

fn app(harness: &Harness) -> Router {
    let executor = Arc::new(GatewayOperationExecutor::with_permits(4, Duration::from_secs(5)));
    let state = AppState {
        charges: Arc::new(ChargeService::new(harness.store.clone())),
        authorise: Arc::new(harness.authorise_service(GatewayOperationExecutor::with_permits(
            4,
            Duration::from_secs(5),
        ))),
        captures: Arc::new(harness.captures(LifecycleConfig::default())),
        cancels: Arc::new(harness.cancels()),
        refunds: Arc::new(harness.refunds()),
        reconciler: Arc::new(harness.reconciler(StaticResolver::default())),
        health: HealthChecker::new(harness.store.clone(), executor, harness.registry.clone()),
    };
    let peer: SocketAddr = "127.0.0.1:40000".parse().unwrap();
    router(state).layer(MockConnectInfo(peer))
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    let request = match body {
        Some(body) => request.body(Body::from(body.to_string())).unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

async fn create_charge(app: &Router, delayed_capture: bool) -> String {
    let (status, body) = send(
        app,
        "POST",
        "/v1/api/charges",
        Some(json!({
            "gateway_account_id": ACCOUNT_ID,
            "amount": 2500,
            "reference": "order-42",
            "description": "Annual subscription",
            "delayed_capture": delayed_capture,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "created");
    body["charge_id"].as_str().unwrap().to_string()
}

fn card_body() -> Value {
    json!({
        "card_number": "4242424242424242",
        "cvc": "123",
        "expiry_date": "12/30",
        "cardholder_name": "Test Payer",
    })
}

#[tokio::test]
async fn payment_page_flow_approves_capture() {
    let harness = Harness::new().await;
    let app = app(&harness);
    let charge_id = create_charge(&app, false).await;

    let (status, body) = send(&app, "POST", &format!("/v1/frontend/charges/{}/card-entry", charge_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "entering_card_details");

    let (status, body) = send(
        &app,
        "POST",
        &format!("/v1/frontend/charges/{}/cards", charge_id),
        Some(card_body()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "authorisation_success");

    let (_, body) = send(&app, "GET", &format!("/v1/api/charges/{}", charge_id), None).await;
    assert_eq!(body["status"], "capture_approved");
}

#[tokio::test]
async fn delayed_capture_waits_for_merchant() {
    let harness = Harness::new().await;
    let app = app(&harness);
    let charge_id = create_charge(&app, true).await;

    send(&app, "POST", &format!("/v1/frontend/charges/{}/card-entry", charge_id), None).await;
    send(
        &app,
        "POST",
        &format!("/v1/frontend/charges/{}/cards", charge_id),
        Some(card_body()),
    )
    .await;
    let (_, body) = send(&app, "GET", &format!("/v1/api/charges/{}", charge_id), None).await;
    assert_eq!(body["status"], "awaiting_capture_request");

    let (status, body) = send(&app, "POST", &format!("/v1/api/charges/{}/capture", charge_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "capture_approved");
}

#[tokio::test]
async fn illegal_capture_is_a_bad_request() {
    let harness = Harness::new().await;
    let app = app(&harness);
    let charge_id = create_charge(&app, false).await;

    let (status, body) = send(&app, "POST", &format!("/v1/api/charges/{}/capture", charge_id), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "ILLEGAL_STATE");
    assert_eq!(body["details"]["status"], "created");
}

#[tokio::test]
async fn unknown_charge_is_not_found() {
    let harness = Harness::new().await;
    let app = app(&harness);

    let (status, body) = send(&app, "GET", "/v1/api/charges/does-not-exist", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "NOT_FOUND");
}

#[tokio::test]
async fn refund_endpoint_reports_availability_errors() {
    let harness = Harness::new().await;
    let app = app(&harness);
    let charge = harness.charge(ChargeStatus::Captured, Some("tx-api-refund")).await;
    let uri = format!("/v1/api/charges/{}/refunds", charge.external_id);

    let (status, body) = send(&app, "POST", &uri, Some(json!({"amount": 400}))).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "refunded");

    let (status, body) = send(
        &app,
        "POST",
        &uri,
        Some(json!({"amount": 100, "refund_amount_available": 1000})),
    )
    .await;
    assert_eq!(status, StatusCode::PRECONDITION_FAILED);
    assert_eq!(body["error"], "REFUND_NOT_AVAILABLE");
}

#[tokio::test]
async fn user_cancel_from_payment_page() {
    let harness = Harness::new().await;
    let app = app(&harness);
    let charge_id = create_charge(&app, false).await;

    let (status, body) = send(&app, "POST", &format!("/v1/frontend/charges/{}/cancel", charge_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "user_cancelled");
    assert_eq!(harness.gateway.calls("cancel"), 0);
}

#[tokio::test]
async fn notification_endpoint_status_codes() {
    let harness = Harness::new().await;
    let app = app(&harness);
    let charge = harness.charge(ChargeStatus::CaptureSubmitted, Some("tx-api-notify")).await;

    let (status, body) = send(
        &app,
        "POST",
        "/v1/api/notifications/sandbox",
        Some(json!({"transaction_id": "tx-api-notify", "status": "CAPTURED"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["accepted"], true);
    assert_eq!(body["outcomes"][0]["outcome"], "applied");
    assert_eq!(harness.status_of(&charge).await, ChargeStatus::Captured);

    let (status, body) = send(
        &app,
        "POST",
        "/v1/api/notifications/worldpay",
        Some(json!({"transaction_id": "tx-api-notify", "status": "CAPTURED"})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["accepted"], false);
}

#[tokio::test]
async fn health_reports_components() {
    let harness = Harness::new().await;
    let app = app(&harness);

    let (status, body) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "Healthy");
    assert_eq!(body["checks"]["gateways"]["status"], "Up");
}
