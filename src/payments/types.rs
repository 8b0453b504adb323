use crate::charges::GatewayAccount;
use crate::payments::error::GatewayError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum GatewayName {
    Sandbox,
    Smartpay,
}

impl GatewayName {
    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayName::Sandbox => "sandbox",
            GatewayName::Smartpay => "smartpay",
        }
    }
}

impl std::fmt::Display for GatewayName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for GatewayName {
    type Err = GatewayError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "sandbox" => Ok(GatewayName::Sandbox),
            "smartpay" => Ok(GatewayName::Smartpay),
            _ => Err(GatewayError::Validation {
                message: format!("unsupported gateway: {}", value),
                field: Some("gateway".to_string()),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CardDetails {
    pub card_number: String,
    pub cvc: String,
    pub expiry_date: String,
    pub cardholder_name: String,
}

impl CardDetails {
    pub fn last_digits(&self) -> &str {
        let len = self.card_number.len();
        &self.card_number[len.saturating_sub(4)..]
    }
}

#[derive(Debug, Clone)]
pub struct AuthorisationRequest {
    pub charge_external_id: String,
    pub amount: i64,
    pub description: String,
    pub card: CardDetails,
    pub account: GatewayAccount,
}

#[derive(Debug, Clone)]
pub struct ChallengeResponseRequest {
    pub charge_external_id: String,
    pub gateway_transaction_id: Option<String>,
    pub challenge_response: String,
    pub account: GatewayAccount,
}

/// Requests that act on a transaction the gateway already knows about.
#[derive(Debug, Clone)]
pub struct TransactionRequest {
    pub charge_external_id: String,
    pub gateway_transaction_id: String,
    pub amount: i64,
    pub account: GatewayAccount,
}

#[derive(Debug, Clone)]
pub struct RefundRequest {
    pub charge_external_id: String,
    pub refund_external_id: String,
    pub gateway_transaction_id: String,
    pub amount: i64,
    pub account: GatewayAccount,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AuthorisationOutcome {
    Authorised { transaction_id: String },
    RequiresThreeDs { transaction_id: String, issuer_url: Option<String> },
    Rejected { transaction_id: Option<String>, reason: Option<String> },
    Cancelled { transaction_id: Option<String> },
}

impl AuthorisationOutcome {
    pub fn transaction_id(&self) -> Option<&str> {
        match self {
            AuthorisationOutcome::Authorised { transaction_id }
            | AuthorisationOutcome::RequiresThreeDs { transaction_id, .. } => {
                Some(transaction_id.as_str())
            }
            AuthorisationOutcome::Rejected { transaction_id, .. }
            | AuthorisationOutcome::Cancelled { transaction_id } => transaction_id.as_deref(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CaptureOutcome {
    Submitted,
    Rejected { reason: Option<String> },
}

#[derive(Debug, Clone, PartialEq)]
pub enum CancelOutcome {
    Cancelled,
    /// Accepted by the gateway; the final result arrives by notification.
    Submitted,
    Rejected { reason: Option<String> },
}

#[derive(Debug, Clone, PartialEq)]
pub enum RefundOutcome {
    Completed { reference: String },
    Submitted { reference: String },
    Rejected { reason: Option<String> },
}

/// One status report pushed by a gateway.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayNotification {
    pub transaction_id: Option<String>,
    /// Raw gateway status code, interpreted through the gateway's status mapper.
    pub status: String,
    /// Refund reference, present on refund notifications.
    pub reference: Option<String>,
    pub event_date: Option<DateTime<Utc>>,
    pub signature: Option<String>,
    pub payload: JsonValue,
}

impl GatewayNotification {
    pub fn new(transaction_id: Option<&str>, status: &str) -> Self {
        Self {
            transaction_id: transaction_id.map(str::to_string),
            status: status.to_string(),
            reference: None,
            event_date: None,
            signature: None,
            payload: JsonValue::Null,
        }
    }
}

/// Per-gateway rules applied before a notification is processed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotificationPolicy {
    pub requires_transaction_id: bool,
    pub trusted_domain: Option<String>,
}
