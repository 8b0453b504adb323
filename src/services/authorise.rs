//! Card authorisation, including the 3-D Secure continuation.

use crate::charges::{Charge, ChargeStatus, GatewayAccount};
use crate::database::{ChargeStore, StatusChange};
use crate::error::{ChargeError, ChargeResult};
use crate::payments::types::{
    AuthorisationOutcome, AuthorisationRequest, CardDetails, ChallengeResponseRequest,
};
use crate::payments::{GatewayRegistry, GatewayResponse, PaymentGateway};
use crate::services::executor::GatewayOperationExecutor;
use crate::services::notifier::StatusChangeNotifier;
use crate::services::pipeline::{
    commit_transition, load_charge, lock_charge, resolve_gateway, LockSpec, PreOperation,
    TransactionPipeline, TransactionalOperation,
};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

const CARD_AUTHORISATION: LockSpec = LockSpec {
    operation: "authorise",
    sources: &[ChargeStatus::EnteringCardDetails],
    lock: ChargeStatus::AuthorisationReady,
    cancellation: false,
};

const CHALLENGE_RESPONSE: LockSpec = LockSpec {
    operation: "authorise_3ds",
    sources: &[ChargeStatus::Authorisation3dsRequired],
    lock: ChargeStatus::Authorisation3dsReady,
    cancellation: false,
};

#[derive(Debug, Clone, Serialize)]
pub struct AuthorisationResult {
    pub charge_external_id: String,
    pub status: ChargeStatus,
    pub gateway_transaction_id: Option<String>,
    /// Where to send the payer for a 3-D Secure challenge.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issuer_url: Option<String>,
}

#[derive(Debug, Clone)]
enum AuthorisationStep {
    Card(CardDetails),
    ChallengeResponse(String),
}

impl AuthorisationStep {
    fn lock_spec(&self) -> &'static LockSpec {
        match self {
            AuthorisationStep::Card(_) => &CARD_AUTHORISATION,
            AuthorisationStep::ChallengeResponse(_) => &CHALLENGE_RESPONSE,
        }
    }
}

pub struct AuthorisationRequestInput {
    charge_external_id: String,
    step: AuthorisationStep,
}

pub struct AuthorisationContext {
    charge: Charge,
    account: GatewayAccount,
    gateway: Arc<dyn PaymentGateway>,
    step: AuthorisationStep,
}

#[derive(Clone)]
struct AuthoriseOperation {
    store: Arc<dyn ChargeStore>,
    registry: Arc<GatewayRegistry>,
    notifier: Arc<dyn StatusChangeNotifier>,
}

#[async_trait]
impl TransactionalOperation for AuthoriseOperation {
    type Request = AuthorisationRequestInput;
    type Context = AuthorisationContext;
    type GatewayOutcome = AuthorisationOutcome;
    type Output = AuthorisationResult;

    fn name(&self) -> &'static str {
        "authorise"
    }

    async fn pre_operation(
        &self,
        request: AuthorisationRequestInput,
    ) -> ChargeResult<PreOperation<AuthorisationContext, AuthorisationResult>> {
        let charge = load_charge(self.store.as_ref(), &request.charge_external_id).await?;
        let (account, gateway) = resolve_gateway(self.store.as_ref(), &self.registry, &charge).await?;
        let locked = lock_charge(self.store.as_ref(), charge, request.step.lock_spec()).await?;

        Ok(PreOperation::Proceed(AuthorisationContext {
            charge: locked.charge,
            account,
            gateway,
            step: request.step,
        }))
    }

    async fn gateway_operation(
        &self,
        context: &AuthorisationContext,
    ) -> GatewayResponse<AuthorisationOutcome> {
        let charge = &context.charge;
        match &context.step {
            AuthorisationStep::Card(card) => {
                context
                    .gateway
                    .authorise(AuthorisationRequest {
                        charge_external_id: charge.external_id.clone(),
                        amount: charge.amount,
                        description: charge.description.clone(),
                        card: card.clone(),
                        account: context.account.clone(),
                    })
                    .await
            }
            AuthorisationStep::ChallengeResponse(challenge_response) => {
                context
                    .gateway
                    .authorise_challenge_response(ChallengeResponseRequest {
                        charge_external_id: charge.external_id.clone(),
                        gateway_transaction_id: charge.gateway_transaction_id.clone(),
                        challenge_response: challenge_response.clone(),
                        account: context.account.clone(),
                    })
                    .await
            }
        }
    }

    async fn post_operation(
        &self,
        context: AuthorisationContext,
        response: GatewayResponse<AuthorisationOutcome>,
    ) -> ChargeResult<AuthorisationResult> {
        let charge = context.charge;
        let outcome = match response {
            Ok(outcome) => outcome,
            Err(e) => {
                let status = if e.is_timeout() {
                    ChargeStatus::AuthorisationTimeout
                } else {
                    ChargeStatus::AuthorisationError
                };
                warn!(
                    charge_external_id = %charge.external_id,
                    gateway = %context.gateway.name(),
                    error = %e,
                    "authorisation failed at gateway"
                );
                commit_transition(
                    self.store.as_ref(),
                    self.notifier.as_ref(),
                    &charge,
                    self.name(),
                    StatusChange::to(status),
                )
                .await?;
                return Err(ChargeError::GatewayFault(e));
            }
        };

        let (status, issuer_url) = match &outcome {
            AuthorisationOutcome::Authorised { .. } => (ChargeStatus::AuthorisationSuccess, None),
            AuthorisationOutcome::RequiresThreeDs { issuer_url, .. } => match &context.step {
                AuthorisationStep::Card(_) => {
                    (ChargeStatus::Authorisation3dsRequired, issuer_url.clone())
                }
                // A second challenge has no legal status to land in. The
                // authorisation-error cleanup cancels it at the gateway.
                AuthorisationStep::ChallengeResponse(_) => {
                    warn!(
                        charge_external_id = %charge.external_id,
                        gateway = %context.gateway.name(),
                        "gateway asked for another 3-D Secure challenge"
                    );
                    (ChargeStatus::AuthorisationError, None)
                }
            },
            AuthorisationOutcome::Rejected { reason, .. } => {
                info!(
                    charge_external_id = %charge.external_id,
                    reason = reason.as_deref().unwrap_or("none"),
                    "authorisation rejected"
                );
                (ChargeStatus::AuthorisationRejected, None)
            }
            AuthorisationOutcome::Cancelled { .. } => (ChargeStatus::AuthorisationCancelled, None),
        };

        // Keep the first transaction id the gateway assigned.
        let transaction_id = match charge.gateway_transaction_id.as_deref() {
            Some(_) => None,
            None => outcome.transaction_id(),
        };

        let updated = commit_transition(
            self.store.as_ref(),
            self.notifier.as_ref(),
            &charge,
            self.name(),
            StatusChange::to(status).with_gateway_transaction_id(transaction_id),
        )
        .await?;

        Ok(AuthorisationResult {
            charge_external_id: updated.external_id,
            status: updated.status,
            gateway_transaction_id: updated.gateway_transaction_id,
            issuer_url,
        })
    }
}

/// Authorises card payments. The whole pipeline runs on the bounded
/// executor; a caller that outlives the executor timeout is told the
/// authorisation is still in progress.
#[derive(Clone)]
pub struct CardAuthoriseService {
    operation: AuthoriseOperation,
    executor: Arc<GatewayOperationExecutor>,
}

impl CardAuthoriseService {
    pub fn new(
        store: Arc<dyn ChargeStore>,
        registry: Arc<GatewayRegistry>,
        notifier: Arc<dyn StatusChangeNotifier>,
        executor: Arc<GatewayOperationExecutor>,
    ) -> Self {
        Self {
            operation: AuthoriseOperation {
                store,
                registry,
                notifier,
            },
            executor,
        }
    }

    pub async fn authorise(
        &self,
        charge_external_id: &str,
        card: CardDetails,
    ) -> ChargeResult<AuthorisationResult> {
        info!(
            charge_external_id = %charge_external_id,
            card_last_digits = %card.last_digits(),
            "authorising card"
        );
        self.run(charge_external_id, AuthorisationStep::Card(card))
            .await
    }

    pub async fn authorise_challenge_response(
        &self,
        charge_external_id: &str,
        challenge_response: &str,
    ) -> ChargeResult<AuthorisationResult> {
        info!(charge_external_id = %charge_external_id, "continuing 3-D Secure authorisation");
        self.run(
            charge_external_id,
            AuthorisationStep::ChallengeResponse(challenge_response.to_string()),
        )
        .await
    }

    async fn run(
        &self,
        charge_external_id: &str,
        step: AuthorisationStep,
    ) -> ChargeResult<AuthorisationResult> {
        let operation = self.operation.clone();
        let operation_name = step.lock_spec().operation;
        let request = AuthorisationRequestInput {
            charge_external_id: charge_external_id.to_string(),
            step,
        };

        self.executor
            .execute(async move { TransactionPipeline::run(&operation, request).await })
            .await
            .into_result(charge_external_id, operation_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::charges::GatewayAccount;
    use crate::database::InMemoryChargeStore;
    use crate::payments::gateways::sandbox::{self, SandboxGateway};
    use crate::payments::GatewayName;
    use crate::services::notifier::LoggingStatusChangeNotifier;
    use std::time::Duration;

    fn card(number: &str) -> CardDetails {
        CardDetails {
            card_number: number.to_string(),
            cvc: "123".to_string(),
            expiry_date: "12/30".to_string(),
            cardholder_name: "Jo Bloggs".to_string(),
        }
    }

    async fn setup() -> (Arc<InMemoryChargeStore>, CardAuthoriseService) {
        let store = Arc::new(InMemoryChargeStore::new());
        store
            .insert_gateway_account(GatewayAccount::new(1, GatewayName::Sandbox))
            .await;
        let registry = GatewayRegistry::new().with_gateway(Arc::new(SandboxGateway::default()));
        let service = CardAuthoriseService::new(
            store.clone(),
            Arc::new(registry),
            Arc::new(LoggingStatusChangeNotifier::new()),
            Arc::new(GatewayOperationExecutor::with_permits(4, Duration::from_secs(5))),
        );
        (store, service)
    }

    async fn entering_card_details(store: &InMemoryChargeStore) -> Charge {
        store
            .insert_charge(
                Charge::new(1, 1500, "ref", "desc").with_status(ChargeStatus::EnteringCardDetails),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn authorised_card_stores_transaction_id() {
        let (store, service) = setup().await;
        let charge = entering_card_details(&store).await;

        let result = service
            .authorise(&charge.external_id, card("4444333322221111"))
            .await
            .unwrap();
        assert_eq!(result.status, ChargeStatus::AuthorisationSuccess);

        let stored = store.reload(charge.id).await.unwrap();
        assert_eq!(stored.status, ChargeStatus::AuthorisationSuccess);
        assert!(stored.gateway_transaction_id.is_some());

        let events: Vec<ChargeStatus> = store
            .find_events(charge.id)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.status)
            .collect();
        assert_eq!(
            events,
            vec![
                ChargeStatus::EnteringCardDetails,
                ChargeStatus::AuthorisationReady,
                ChargeStatus::AuthorisationSuccess,
            ]
        );
    }

    #[tokio::test]
    async fn gateway_error_is_recorded_then_surfaced() {
        let (store, service) = setup().await;
        let charge = entering_card_details(&store).await;

        let result = service
            .authorise(&charge.external_id, card(sandbox::ERROR_CARD))
            .await;
        assert!(matches!(result, Err(ChargeError::GatewayFault(_))));
        assert_eq!(
            store.reload(charge.id).await.unwrap().status,
            ChargeStatus::AuthorisationError
        );
    }

    #[tokio::test]
    async fn three_ds_then_challenge_response() {
        let (store, service) = setup().await;
        let charge = entering_card_details(&store).await;

        let first = service
            .authorise(&charge.external_id, card(sandbox::THREE_DS_CARD))
            .await
            .unwrap();
        assert_eq!(first.status, ChargeStatus::Authorisation3dsRequired);
        let transaction_id = first.gateway_transaction_id.clone();

        let second = service
            .authorise_challenge_response(&charge.external_id, "approved")
            .await
            .unwrap();
        assert_eq!(second.status, ChargeStatus::AuthorisationSuccess);
        assert_eq!(second.gateway_transaction_id, transaction_id);
    }

    #[tokio::test]
    async fn authorising_twice_is_illegal() {
        let (store, service) = setup().await;
        let charge = entering_card_details(&store).await;
        service
            .authorise(&charge.external_id, card("4444333322221111"))
            .await
            .unwrap();

        let again = service
            .authorise(&charge.external_id, card("4444333322221111"))
            .await;
        assert!(matches!(again, Err(ChargeError::IllegalState { .. })));
    }
}
