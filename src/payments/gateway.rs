use crate::charges::GatewayAccount;
use crate::payments::error::GatewayResponse;
use crate::payments::status_mapper::StatusMapper;
use crate::payments::types::{
    AuthorisationOutcome, AuthorisationRequest, CancelOutcome, CaptureOutcome,
    ChallengeResponseRequest, GatewayName, GatewayNotification, NotificationPolicy,
    RefundOutcome, RefundRequest, TransactionRequest,
};
use async_trait::async_trait;

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn name(&self) -> GatewayName;

    async fn authorise(
        &self,
        request: AuthorisationRequest,
    ) -> GatewayResponse<AuthorisationOutcome>;

    /// Completes an authorisation that required a 3-D Secure challenge.
    async fn authorise_challenge_response(
        &self,
        request: ChallengeResponseRequest,
    ) -> GatewayResponse<AuthorisationOutcome>;

    async fn capture(&self, request: TransactionRequest) -> GatewayResponse<CaptureOutcome>;

    async fn cancel(&self, request: TransactionRequest) -> GatewayResponse<CancelOutcome>;

    async fn refund(&self, request: RefundRequest) -> GatewayResponse<RefundOutcome>;

    /// Splits a raw notification payload into individual notifications.
    fn parse_notification(&self, payload: &[u8]) -> GatewayResponse<Vec<GatewayNotification>>;

    /// Checks a parsed notification against the credentials of the account
    /// that owns the charge it refers to.
    fn verify_notification(
        &self,
        notification: &GatewayNotification,
        account: &GatewayAccount,
    ) -> bool;

    fn status_mapper(&self) -> &StatusMapper;

    fn notification_policy(&self) -> NotificationPolicy;
}
