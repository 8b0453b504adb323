use crate::charges::{ChargeStatus, GatewayAccount, RefundStatus};
use crate::payments::error::{GatewayError, GatewayResponse};
use crate::payments::gateway::PaymentGateway;
use crate::payments::status_mapper::{StatusMapper, CANCELLATION_FAILURE_RESOLVER, CANCELLATION_RESOLVER};
use crate::payments::types::{
    AuthorisationOutcome, AuthorisationRequest, CancelOutcome, CaptureOutcome,
    ChallengeResponseRequest, GatewayName, GatewayNotification, NotificationPolicy,
    RefundOutcome, RefundRequest, TransactionRequest,
};
use crate::payments::utils::{verify_hmac_sha256_base64, BasicAuth, GatewayHttpClient};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::{info, warn};

pub const MERCHANT_ACCOUNT: &str = "merchant_id";
pub const USERNAME: &str = "username";
pub const PASSWORD: &str = "password";
pub const NOTIFICATION_HMAC_KEY: &str = "notification_hmac_key";

const CURRENCY: &str = "GBP";

#[derive(Debug, Clone)]
pub struct SmartpayConfig {
    pub base_url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub notification_domain: Option<String>,
}

impl Default for SmartpayConfig {
    fn default() -> Self {
        Self {
            base_url: "https://pal-test.smartpay.invalid/pal/servlet/Payment/v30".to_string(),
            username: None,
            password: None,
            timeout_secs: 30,
            max_retries: 2,
            notification_domain: None,
        }
    }
}

impl SmartpayConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_url: std::env::var("SMARTPAY_BASE_URL").unwrap_or(defaults.base_url),
            username: std::env::var("SMARTPAY_USERNAME").ok(),
            password: std::env::var("SMARTPAY_PASSWORD").ok(),
            timeout_secs: std::env::var("SMARTPAY_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(defaults.timeout_secs),
            max_retries: std::env::var("SMARTPAY_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(defaults.max_retries),
            notification_domain: std::env::var("SMARTPAY_NOTIFICATION_DOMAIN")
                .ok()
                .filter(|v| !v.trim().is_empty()),
        }
    }
}

pub struct SmartpayGateway {
    config: SmartpayConfig,
    http: GatewayHttpClient,
    mapper: StatusMapper,
}

impl SmartpayGateway {
    pub fn new(config: SmartpayConfig) -> GatewayResponse<Self> {
        let http = GatewayHttpClient::new(
            "smartpay",
            Duration::from_secs(config.timeout_secs),
            config.max_retries,
        )?;
        let mapper = StatusMapper::builder()
            .map("AUTHORISATION", ChargeStatus::AuthorisationSuccess)
            .map("AUTHORISATION_FAILED", ChargeStatus::AuthorisationRejected)
            .map("CAPTURE", ChargeStatus::Captured)
            .map("CAPTURE_FAILED", ChargeStatus::CaptureError)
            .defer("CANCELLATION", CANCELLATION_RESOLVER)
            .defer("CANCELLATION_FAILED", CANCELLATION_FAILURE_RESOLVER)
            .map_refund("REFUND", RefundStatus::Refunded)
            .map_refund("REFUND_FAILED", RefundStatus::RefundError)
            .ignore("REPORT_AVAILABLE")
            .ignore("PENDING")
            .ignore("REFUNDED_REVERSED")
            .build();
        Ok(Self {
            config,
            http,
            mapper,
        })
    }

    pub fn from_env() -> GatewayResponse<Self> {
        Self::new(SmartpayConfig::from_env())
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn auth(&self, account: &GatewayAccount) -> GatewayResponse<BasicAuth> {
        let username = account
            .credential(USERNAME)
            .map(str::to_string)
            .or_else(|| self.config.username.clone());
        let password = account
            .credential(PASSWORD)
            .map(str::to_string)
            .or_else(|| self.config.password.clone());
        match (username, password) {
            (Some(username), Some(password)) => Ok(BasicAuth { username, password }),
            _ => Err(GatewayError::Validation {
                message: format!("gateway account {} has no smartpay credentials", account.id),
                field: Some(USERNAME.to_string()),
            }),
        }
    }

    fn merchant_account(account: &GatewayAccount) -> GatewayResponse<String> {
        account
            .credential(MERCHANT_ACCOUNT)
            .map(str::to_string)
            .ok_or(GatewayError::Validation {
                message: format!("gateway account {} has no merchant id", account.id),
                field: Some(MERCHANT_ACCOUNT.to_string()),
            })
    }

    fn parse_expiry(expiry_date: &str) -> GatewayResponse<(String, String)> {
        let (month, year) = expiry_date
            .split_once('/')
            .ok_or(GatewayError::Validation {
                message: "expiry date must be MM/YY".to_string(),
                field: Some("expiry_date".to_string()),
            })?;
        Ok((month.trim().to_string(), format!("20{}", year.trim())))
    }

    fn authorisation_outcome(response: SmartpayAuthorisationResponse) -> GatewayResponse<AuthorisationOutcome> {
        match response.result_code.as_str() {
            "Authorised" => Ok(AuthorisationOutcome::Authorised {
                transaction_id: response.psp_reference,
            }),
            "RedirectShopper" => Ok(AuthorisationOutcome::RequiresThreeDs {
                transaction_id: response.psp_reference,
                issuer_url: response.issuer_url,
            }),
            "Refused" => Ok(AuthorisationOutcome::Rejected {
                transaction_id: Some(response.psp_reference),
                reason: response.refusal_reason,
            }),
            "Cancelled" => Ok(AuthorisationOutcome::Cancelled {
                transaction_id: Some(response.psp_reference),
            }),
            other => Err(GatewayError::Provider {
                gateway: "smartpay".to_string(),
                message: response
                    .refusal_reason
                    .unwrap_or_else(|| format!("unexpected result code {}", other)),
                code: Some(other.to_string()),
                retryable: false,
            }),
        }
    }

    async fn modify(
        &self,
        path: &str,
        request: &TransactionRequest,
    ) -> GatewayResponse<SmartpayModificationResponse> {
        let payload = serde_json::json!({
            "merchantAccount": Self::merchant_account(&request.account)?,
            "originalReference": request.gateway_transaction_id,
            "modificationAmount": { "value": request.amount, "currency": CURRENCY },
            "reference": request.charge_external_id,
        });
        self.http
            .post_json(&self.endpoint(path), Some(&self.auth(&request.account)?), &payload)
            .await
    }

    /// Fields covered by the notification HMAC, in signing order.
    pub fn signing_payload(item: &JsonValue) -> String {
        let field = |name: &str| {
            item.get(name)
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string()
        };
        let amount = item.get("amount");
        let value = amount
            .and_then(|a| a.get("value"))
            .map(|v| match v {
                JsonValue::String(s) => s.clone(),
                other => other.to_string(),
            })
            .unwrap_or_default();
        let currency = amount
            .and_then(|a| a.get("currency"))
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();

        [
            field("pspReference"),
            field("originalReference"),
            field("merchantAccountCode"),
            field("merchantReference"),
            value,
            currency,
            field("eventCode"),
            field("success"),
        ]
        .join(":")
    }
}

#[async_trait]
impl PaymentGateway for SmartpayGateway {
    fn name(&self) -> GatewayName {
        GatewayName::Smartpay
    }

    async fn authorise(
        &self,
        request: AuthorisationRequest,
    ) -> GatewayResponse<AuthorisationOutcome> {
        let (expiry_month, expiry_year) = Self::parse_expiry(&request.card.expiry_date)?;
        let payload = serde_json::json!({
            "merchantAccount": Self::merchant_account(&request.account)?,
            "reference": request.charge_external_id,
            "amount": { "value": request.amount, "currency": CURRENCY },
            "shopperStatement": request.description,
            "card": {
                "number": request.card.card_number,
                "cvc": request.card.cvc,
                "expiryMonth": expiry_month,
                "expiryYear": expiry_year,
                "holderName": request.card.cardholder_name,
            },
        });

        let response: SmartpayAuthorisationResponse = self
            .http
            .post_json(
                &self.endpoint("/authorise"),
                Some(&self.auth(&request.account)?),
                &payload,
            )
            .await?;
        info!(
            charge_external_id = %request.charge_external_id,
            result_code = %response.result_code,
            "smartpay authorisation response"
        );
        Self::authorisation_outcome(response)
    }

    async fn authorise_challenge_response(
        &self,
        request: ChallengeResponseRequest,
    ) -> GatewayResponse<AuthorisationOutcome> {
        let payload = serde_json::json!({
            "merchantAccount": Self::merchant_account(&request.account)?,
            "md": request.gateway_transaction_id,
            "paResponse": request.challenge_response,
        });
        let response: SmartpayAuthorisationResponse = self
            .http
            .post_json(
                &self.endpoint("/authorise3d"),
                Some(&self.auth(&request.account)?),
                &payload,
            )
            .await?;
        Self::authorisation_outcome(response)
    }

    async fn capture(&self, request: TransactionRequest) -> GatewayResponse<CaptureOutcome> {
        let response = self.modify("/capture", &request).await?;
        match response.response.as_str() {
            "[capture-received]" => Ok(CaptureOutcome::Submitted),
            other => Ok(CaptureOutcome::Rejected {
                reason: Some(other.to_string()),
            }),
        }
    }

    async fn cancel(&self, request: TransactionRequest) -> GatewayResponse<CancelOutcome> {
        let response = self.modify("/cancel", &request).await?;
        match response.response.as_str() {
            "[cancel-received]" => Ok(CancelOutcome::Submitted),
            other => Ok(CancelOutcome::Rejected {
                reason: Some(other.to_string()),
            }),
        }
    }

    async fn refund(&self, request: RefundRequest) -> GatewayResponse<RefundOutcome> {
        let payload = serde_json::json!({
            "merchantAccount": Self::merchant_account(&request.account)?,
            "originalReference": request.gateway_transaction_id,
            "modificationAmount": { "value": request.amount, "currency": CURRENCY },
            "reference": request.refund_external_id,
        });
        let response: SmartpayModificationResponse = self
            .http
            .post_json(
                &self.endpoint("/refund"),
                Some(&self.auth(&request.account)?),
                &payload,
            )
            .await?;
        match response.response.as_str() {
            "[refund-received]" => Ok(RefundOutcome::Submitted {
                reference: response.psp_reference,
            }),
            other => Ok(RefundOutcome::Rejected {
                reason: Some(other.to_string()),
            }),
        }
    }

    fn parse_notification(&self, payload: &[u8]) -> GatewayResponse<Vec<GatewayNotification>> {
        let envelope: SmartpayNotificationEnvelope =
            serde_json::from_slice(payload).map_err(|e| GatewayError::NotificationParse {
                message: format!("invalid smartpay notification: {}", e),
            })?;

        envelope
            .notification_items
            .into_iter()
            .map(|wrapper| {
                let raw = wrapper.notification_request_item;
                let item: SmartpayNotificationItem = serde_json::from_value(raw.clone())
                    .map_err(|e| GatewayError::NotificationParse {
                        message: format!("invalid smartpay notification item: {}", e),
                    })?;

                let status = if item.success.eq_ignore_ascii_case("true") {
                    item.event_code.clone()
                } else {
                    format!("{}_FAILED", item.event_code)
                };
                let event_date = item.event_date.as_deref().and_then(|d| {
                    DateTime::parse_from_rfc3339(d)
                        .map(|dt| dt.with_timezone(&Utc))
                        .ok()
                });
                let signature = raw
                    .get("additionalData")
                    .and_then(|d| d.get("hmacSignature"))
                    .and_then(|v| v.as_str())
                    .map(str::to_string);

                Ok(GatewayNotification {
                    transaction_id: item
                        .original_reference
                        .filter(|r| !r.is_empty())
                        .or_else(|| Some(item.psp_reference.clone())),
                    status,
                    reference: Some(item.psp_reference),
                    event_date,
                    signature,
                    payload: raw,
                })
            })
            .collect()
    }

    fn verify_notification(
        &self,
        notification: &GatewayNotification,
        account: &GatewayAccount,
    ) -> bool {
        let Some(key) = account.credential(NOTIFICATION_HMAC_KEY) else {
            warn!(
                gateway_account_id = account.id,
                "smartpay account has no notification hmac key"
            );
            return false;
        };
        let Some(signature) = notification.signature.as_deref() else {
            return false;
        };
        verify_hmac_sha256_base64(
            Self::signing_payload(&notification.payload).as_bytes(),
            key,
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
#[serde(rename_all = "camelCase")]
struct SmartpayAuthorisationResponse {
    psp_reference: String,
    result_code: String,
    refusal_reason: Option<String>,
    issuer_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SmartpayModificationResponse {
    psp_reference: String,
    response: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SmartpayNotificationEnvelope {
    notification_items: Vec<SmartpayNotificationWrapper>,
}

#[derive(Debug, Deserialize)]
struct SmartpayNotificationWrapper {
    #[serde(rename = "NotificationRequestItem")]
    notification_request_item: JsonValue,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SmartpayNotificationItem {
    event_code: String,
    success: String,
    psp_reference: String,
    original_reference: Option<String>,
    event_date: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::status_mapper::InterpretedStatus;
    use crate::payments::types::CardDetails;
    use crate::payments::utils::sign_hmac_sha256_base64;

    const HMAC_KEY: &str = "44782def547aaa06c910c43932b1eb0c71fc68d9d0c057550c48ec2acf6ba056";

    fn account() -> GatewayAccount {
        GatewayAccount::new(7, GatewayName::Smartpay)
            .with_credential(MERCHANT_ACCOUNT, "MerchantGB")
            .with_credential(USERNAME, "ws_user")
            .with_credential(PASSWORD, "ws_pass")
            .with_credential(NOTIFICATION_HMAC_KEY, HMAC_KEY)
    }

    fn gateway(base_url: String) -> SmartpayGateway {
        SmartpayGateway::new(SmartpayConfig {
            base_url,
            max_retries: 0,
            timeout_secs: 5,
            ..SmartpayConfig::default()
        })
        .unwrap()
    }

    fn notification_item(event_code: &str, success: &str) -> JsonValue {
        serde_json::json!({
            "eventCode": event_code,
            "success": success,
            "pspReference": "psp-2",
            "originalReference": "psp-1",
            "merchantAccountCode": "MerchantGB",
            "merchantReference": "charge-1",
            "eventDate": "2024-03-01T10:00:00+00:00",
            "amount": { "value": 1000, "currency": "GBP" }
        })
    }

    #[tokio::test]
    async fn authorise_maps_result_codes() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/authorise")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"pspReference":"psp-1","resultCode":"Authorised"}"#)
            .create_async()
            .await;

        let outcome = gateway(server.url())
            .authorise(AuthorisationRequest {
                charge_external_id: "charge-1".to_string(),
                amount: 1000,
                description: "test".to_string(),
                card: CardDetails {
                    card_number: "4444333322221111".to_string(),
                    cvc: "737".to_string(),
                    expiry_date: "03/30".to_string(),
                    cardholder_name: "J Doe".to_string(),
                },
                account: account(),
            })
            .await
            .unwrap();
        assert_eq!(
            outcome,
            AuthorisationOutcome::Authorised {
                transaction_id: "psp-1".to_string()
            }
        );
    }

    #[tokio::test]
    async fn cancel_is_asynchronous() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/cancel")
            .with_status(200)
            .with_body(r#"{"pspReference":"psp-9","response":"[cancel-received]"}"#)
            .create_async()
            .await;

        let outcome = gateway(server.url())
            .cancel(TransactionRequest {
                charge_external_id: "charge-1".to_string(),
                gateway_transaction_id: "psp-1".to_string(),
                amount: 1000,
                account: account(),
            })
            .await
            .unwrap();
        assert_eq!(outcome, CancelOutcome::Submitted);
    }

    #[tokio::test]
    async fn client_errors_surface_as_provider_faults() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/capture")
            .with_status(422)
            .with_body(r#"{"errorCode":"167","message":"Original pspReference required"}"#)
            .create_async()
            .await;

        let result = gateway(server.url())
            .capture(TransactionRequest {
                charge_external_id: "charge-1".to_string(),
                gateway_transaction_id: "psp-1".to_string(),
                amount: 1000,
                account: account(),
            })
            .await;
        assert!(matches!(
            result,
            Err(GatewayError::Provider { retryable: false, .. })
        ));
    }

    #[test]
    fn parses_notification_batches() {
        let gateway = gateway(SmartpayConfig::default().base_url);
        let payload = serde_json::json!({
            "live": "false",
            "notificationItems": [
                { "NotificationRequestItem": notification_item("CAPTURE", "true") },
                { "NotificationRequestItem": notification_item("REFUND", "false") }
            ]
        });

        let parsed = gateway
            .parse_notification(payload.to_string().as_bytes())
            .unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].transaction_id.as_deref(), Some("psp-1"));
        assert_eq!(parsed[0].status, "CAPTURE");
        assert_eq!(parsed[1].status, "REFUND_FAILED");
        assert_eq!(parsed[1].reference.as_deref(), Some("psp-2"));
        assert!(parsed[0].event_date.is_some());
        assert_eq!(
            gateway
                .status_mapper()
                .interpret(&parsed[1].status, ChargeStatus::Captured),
            InterpretedStatus::MappedRefund(RefundStatus::RefundError)
        );
    }

    #[test]
    fn verifies_hmac_signature() {
        let gateway = gateway(SmartpayConfig::default().base_url);
        let mut item = notification_item("CAPTURE", "true");
        let signature =
            sign_hmac_sha256_base64(SmartpayGateway::signing_payload(&item).as_bytes(), HMAC_KEY)
                .unwrap();
        item["additionalData"] = serde_json::json!({ "hmacSignature": signature });
        let payload = serde_json::json!({ "notificationItems": [{ "NotificationRequestItem": item }] });

        let parsed = gateway
            .parse_notification(payload.to_string().as_bytes())
            .unwrap();
        assert!(gateway.verify_notification(&parsed[0], &account()));

        let mut tampered = parsed[0].clone();
        tampered.payload["eventCode"] = serde_json::json!("CANCELLATION");
        assert!(!gateway.verify_notification(&tampered, &account()));
    }
}
