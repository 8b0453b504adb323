//! In-process gateway with outcomes driven by the card number, for test
//! accounts and local development.

use crate::charges::{ChargeStatus, GatewayAccount, RefundStatus};
use crate::payments::error::{GatewayError, GatewayResponse};
use crate::payments::gateway::PaymentGateway;
use crate::payments::status_mapper::{StatusMapper, CANCELLATION_FAILURE_RESOLVER, CANCELLATION_RESOLVER};
use crate::payments::types::{
    AuthorisationOutcome, AuthorisationRequest, CancelOutcome, CaptureOutcome,
    ChallengeResponseRequest, GatewayName, GatewayNotification, NotificationPolicy,
    RefundOutcome, RefundRequest, TransactionRequest,
};
use crate::payments::utils::verify_hmac_sha512_hex;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::{debug, info};
use uuid::Uuid;

pub const REJECTED_CARD: &str = "4000000000000002";
pub const ERROR_CARD: &str = "4000000000000119";
pub const THREE_DS_CARD: &str = "4000000000003220";
pub const GATEWAY_CANCELLED_CARD: &str = "4000000000000069";
pub const TIMEOUT_CARD: &str = "4000000000000259";

/// Challenge response that makes a 3-D Secure continuation fail.
pub const REJECTED_CHALLENGE: &str = "rejected";

/// Account credential holding the secret notifications are signed with.
pub const NOTIFICATION_SECRET: &str = "notification_secret";

#[derive(Debug, Clone, Default)]
pub struct SandboxConfig {
    pub notification_domain: Option<String>,
}

impl SandboxConfig {
    pub fn from_env() -> Self {
        Self {
            notification_domain: std::env::var("SANDBOX_NOTIFICATION_DOMAIN")
                .ok()
                .filter(|v| !v.trim().is_empty()),
        }
    }
}

pub struct SandboxGateway {
    config: SandboxConfig,
    mapper: StatusMapper,
}

impl SandboxGateway {
    pub fn new(config: SandboxConfig) -> Self {
        let mapper = StatusMapper::builder()
            .map("AUTHORISED", ChargeStatus::AuthorisationSuccess)
            .map("REJECTED", ChargeStatus::AuthorisationRejected)
            .map("CAPTURED", ChargeStatus::Captured)
            .map("CAPTURE_FAILED", ChargeStatus::CaptureError)
            .defer("CANCELLED", CANCELLATION_RESOLVER)
            .defer("CANCEL_FAILED", CANCELLATION_FAILURE_RESOLVER)
            .map_refund("REFUNDED", RefundStatus::Refunded)
            .map_refund("REFUND_FAILED", RefundStatus::RefundError)
            .ignore("PENDING")
            .build();
        Self { config, mapper }
    }

    pub fn from_env() -> Self {
        Self::new(SandboxConfig::from_env())
    }

    /// Bytes covered by a sandbox notification signature.
    pub fn signing_payload(notification: &GatewayNotification) -> String {
        format!(
            "{}|{}|{}",
            notification.transaction_id.as_deref().unwrap_or(""),
            notification.status,
            notification.reference.as_deref().unwrap_or("")
        )
    }

    fn new_transaction_id() -> String {
        format!("sandbox-{}", Uuid::new_v4().simple())
    }
}

impl Default for SandboxGateway {
    fn default() -> Self {
        Self::new(SandboxConfig::default())
    }
}

#[async_trait]
impl PaymentGateway for SandboxGateway {
    fn name(&self) -> GatewayName {
        GatewayName::Sandbox
    }

    async fn authorise(
        &self,
        request: AuthorisationRequest,
    ) -> GatewayResponse<AuthorisationOutcome> {
        let transaction_id = Self::new_transaction_id();
        debug!(
            charge_external_id = %request.charge_external_id,
            card_last_digits = request.card.last_digits(),
            "sandbox authorisation"
        );

        match request.card.card_number.as_str() {
            REJECTED_CARD => Ok(AuthorisationOutcome::Rejected {
                transaction_id: Some(transaction_id),
                reason: Some("card declined".to_string()),
            }),
            ERROR_CARD => Err(GatewayError::provider("sandbox", "card processing error")),
            TIMEOUT_CARD => Err(GatewayError::Timeout {
                message: "sandbox simulated timeout".to_string(),
            }),
            THREE_DS_CARD => Ok(AuthorisationOutcome::RequiresThreeDs {
                transaction_id,
                issuer_url: Some("https://sandbox.invalid/3ds".to_string()),
            }),
            GATEWAY_CANCELLED_CARD => Ok(AuthorisationOutcome::Cancelled {
                transaction_id: Some(transaction_id),
            }),
            _ => Ok(AuthorisationOutcome::Authorised { transaction_id }),
        }
    }

    async fn authorise_challenge_response(
        &self,
        request: ChallengeResponseRequest,
    ) -> GatewayResponse<AuthorisationOutcome> {
        let transaction_id = request
            .gateway_transaction_id
            .unwrap_or_else(Self::new_transaction_id);

        if request.challenge_response.trim() == REJECTED_CHALLENGE {
            return Ok(AuthorisationOutcome::Rejected {
                transaction_id: Some(transaction_id),
                reason: Some("3ds challenge failed".to_string()),
            });
        }
        Ok(AuthorisationOutcome::Authorised { transaction_id })
    }

    async fn capture(&self, request: TransactionRequest) -> GatewayResponse<CaptureOutcome> {
        info!(
            charge_external_id = %request.charge_external_id,
            gateway_transaction_id = %request.gateway_transaction_id,
            "sandbox capture"
        );
        Ok(CaptureOutcome::Submitted)
    }

    async fn cancel(&self, _request: TransactionRequest) -> GatewayResponse<CancelOutcome> {
        Ok(CancelOutcome::Cancelled)
    }

    async fn refund(&self, request: RefundRequest) -> GatewayResponse<RefundOutcome> {
        Ok(RefundOutcome::Completed {
            reference: format!("sandbox-refund-{}", request.refund_external_id),
        })
    }

    fn parse_notification(&self, payload: &[u8]) -> GatewayResponse<Vec<GatewayNotification>> {
        let parsed: JsonValue =
            serde_json::from_slice(payload).map_err(|e| GatewayError::NotificationParse {
                message: format!("invalid sandbox notification JSON: {}", e),
            })?;

        let items = match parsed {
            JsonValue::Array(items) => items,
            single @ JsonValue::Object(_) => vec![single],
            _ => {
                return Err(GatewayError::NotificationParse {
                    message: "sandbox notification must be an object or an array".to_string(),
                })
            }
        };

        items
            .into_iter()
            .map(|item| {
                let body: SandboxNotification = serde_json::from_value(item.clone()).map_err(
                    |e| GatewayError::NotificationParse {
                        message: format!("invalid sandbox notification: {}", e),
                    },
                )?;
                Ok(GatewayNotification {
                    transaction_id: body.transaction_id,
                    status: body.status,
                    reference: body.reference,
                    event_date: body.event_date,
                    signature: body.signature,
                    payload: item,
                })
            })
            .collect()
    }

    fn verify_notification(
        &self,
        notification: &GatewayNotification,
        account: &GatewayAccount,
    ) -> bool {
        let Some(secret) = account.credential(NOTIFICATION_SECRET) else {
            return true;
        };
        let Some(signature) = notification.signature.as_deref() else {
            return false;
        };
        verify_hmac_sha512_hex(
            Self::signing_payload(notification).as_bytes(),
            secret,
            signature,
        )
    }

    fn status_mapper(&self) -> &StatusMapper {
        &self.mapper
    }

    fn notification_policy(&self) -> NotificationPolicy {
        NotificationPolicy {
            requires_transaction_id: true,
            trusted_domain: self.config.notification_domain.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SandboxNotification {
    transaction_id: Option<String>,
    status: String,
    reference: Option<String>,
    event_date: Option<DateTime<Utc>>,
    signature: Option<String>,
}
