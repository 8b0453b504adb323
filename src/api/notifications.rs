use crate::api::AppState;
use axum::{
    body::Bytes,
    extract::{ConnectInfo, Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use std::net::{IpAddr, SocketAddr};
use tracing::{info, warn};

/// POST /v1/api/notifications/{gateway}
///
/// 200 once the request is accepted, whatever happened to the individual
/// notifications in it; 403 when the gateway is unknown or the source could
/// not be verified.
pub async fn receive_notification(
    State(state): State<AppState>,
    Path(gateway): Path<String>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let source_ip = source_ip(&headers, peer);
    info!(gateway = %gateway, source_ip = ?source_ip, bytes = body.len(), "Received gateway notification");

    let receipt = state.reconciler.reconcile(source_ip, &gateway, &body).await;
    if receipt.accepted {
        (StatusCode::OK, Json(receipt))
    } else {
        warn!(gateway = %gateway, source_ip = ?source_ip, "Gateway notification rejected");
        (StatusCode::FORBIDDEN, Json(receipt))
    }
}

/// First `X-Forwarded-For` hop, falling back to the socket peer.
pub fn source_ip(headers: &HeaderMap, peer: SocketAddr) -> Option<IpAddr> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    match forwarded {
        Some(value) => match value.parse() {
            Ok(ip) => Some(ip),
            Err(_) => {
                warn!(x_forwarded_for = %value, "Unparseable X-Forwarded-For");
                None
            }
        },
        None => Some(peer.ip()),
    }
}
