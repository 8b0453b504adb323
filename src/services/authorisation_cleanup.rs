//! Cleans up charges whose authorisation ended in an error by cancelling
//! whatever the gateway may still hold for them.

use crate::charges::{Charge, ChargeStatus, GatewayAccount};
use crate::database::{ChargeStore, StatusChange};
use crate::error::{ChargeError, ChargeResult};
use crate::payments::types::{CancelOutcome, TransactionRequest};
use crate::payments::{GatewayRegistry, GatewayResponse, PaymentGateway};
use crate::services::notifier::StatusChangeNotifier;
use crate::services::pipeline::{
    commit_transition, load_charge, resolve_gateway, PreOperation, TransactionPipeline,
    TransactionalOperation,
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

const OPERATION: &str = "authorisation_error_cleanup";

pub struct CleanupContext {
    charge: Charge,
    account: GatewayAccount,
    gateway: Arc<dyn PaymentGateway>,
    transaction_id: String,
}

struct CleanupOperation<'a> {
    service: &'a AuthorisationErrorCleanupService,
}

#[async_trait]
impl TransactionalOperation for CleanupOperation<'_> {
    type Request = Charge;
    type Context = CleanupContext;
    type GatewayOutcome = CancelOutcome;
    type Output = Charge;

    fn name(&self) -> &'static str {
        OPERATION
    }

    async fn pre_operation(&self, charge: Charge) -> ChargeResult<PreOperation<CleanupContext, Charge>> {
        let store = self.service.store.as_ref();
        let charge = store.reload(charge.id).await?;
        if !ChargeStatus::AUTHORISATION_ERROR_STATUSES.contains(&charge.status) {
            return Err(ChargeError::IllegalState {
                charge_external_id: charge.external_id,
                operation: OPERATION,
                status: charge.status,
            });
        }

        let Some(transaction_id) = charge.gateway_transaction_id.clone() else {
            let missing = commit_transition(
                store,
                self.service.notifier.as_ref(),
                &charge,
                OPERATION,
                StatusChange::to(ChargeStatus::AuthorisationErrorChargeMissing),
            )
            .await?;
            return Ok(PreOperation::Completed(missing));
        };

        // No lock status exists for cleanup: concurrent sweeps may both send
        // the cancel, and only one versioned commit records the outcome.
        let (account, gateway) = resolve_gateway(store, &self.service.registry, &charge).await?;
        Ok(PreOperation::Proceed(CleanupContext {
            charge,
            account,
            gateway,
            transaction_id,
        }))
    }

    async fn gateway_operation(&self, context: &CleanupContext) -> GatewayResponse<CancelOutcome> {
        context
            .gateway
            .cancel(TransactionRequest {
                charge_external_id: context.charge.external_id.clone(),
                gateway_transaction_id: context.transaction_id.clone(),
                amount: context.charge.amount,
                account: context.account.clone(),
            })
            .await
    }

    async fn post_operation(
        &self,
        context: CleanupContext,
        response: GatewayResponse<CancelOutcome>,
    ) -> ChargeResult<Charge> {
        let status = match response {
            Ok(CancelOutcome::Cancelled) | Ok(CancelOutcome::Submitted) => {
                ChargeStatus::AuthorisationErrorCancelled
            }
            Ok(CancelOutcome::Rejected { reason }) => {
                warn!(
                    charge_external_id = %context.charge.external_id,
                    reason = reason.as_deref().unwrap_or("none"),
                    "gateway refused to cancel errored authorisation"
                );
                ChargeStatus::AuthorisationErrorRejected
            }
            Err(e) => {
                // Left as is so a later sweep retries it.
                warn!(
                    charge_external_id = %context.charge.external_id,
                    error = %e,
                    "authorisation error cleanup failed at gateway"
                );
                return Err(ChargeError::GatewayFault(e));
            }
        };

        commit_transition(
            self.service.store.as_ref(),
            self.service.notifier.as_ref(),
            &context.charge,
            OPERATION,
            StatusChange::to(status),
        )
        .await
    }
}

pub struct AuthorisationErrorCleanupService {
    store: Arc<dyn ChargeStore>,
    registry: Arc<GatewayRegistry>,
    notifier: Arc<dyn StatusChangeNotifier>,
}

impl AuthorisationErrorCleanupService {
    pub fn new(
        store: Arc<dyn ChargeStore>,
        registry: Arc<GatewayRegistry>,
        notifier: Arc<dyn StatusChangeNotifier>,
    ) -> Self {
        Self {
            store,
            registry,
            notifier,
        }
    }

    pub async fn cleanup(&self, charge: Charge) -> ChargeResult<Charge> {
        TransactionPipeline::run(&CleanupOperation { service: self }, charge).await
    }

    pub async fn cleanup_by_external_id(&self, charge_external_id: &str) -> ChargeResult<Charge> {
        let charge = load_charge(self.store.as_ref(), charge_external_id).await?;
        self.cleanup(charge).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::InMemoryChargeStore;
    use crate::payments::gateways::SandboxGateway;
    use crate::payments::GatewayName;
    use crate::services::notifier::LoggingStatusChangeNotifier;

    async fn setup() -> (Arc<InMemoryChargeStore>, AuthorisationErrorCleanupService) {
        let store = Arc::new(InMemoryChargeStore::new());
        store
            .insert_gateway_account(GatewayAccount::new(1, GatewayName::Sandbox))
            .await;
        let service = AuthorisationErrorCleanupService::new(
            store.clone(),
            Arc::new(GatewayRegistry::new().with_gateway(Arc::new(SandboxGateway::default()))),
            Arc::new(LoggingStatusChangeNotifier::new()),
        );
        (store, service)
    }

    #[tokio::test]
    async fn missing_transaction_skips_gateway() {
        let (store, service) = setup().await;
        let charge = store
            .insert_charge(Charge::new(1, 100, "r", "d").with_status(ChargeStatus::AuthorisationTimeout))
            .await
            .unwrap();
        let cleaned = service.cleanup(charge).await.unwrap();
        assert_eq!(cleaned.status, ChargeStatus::AuthorisationErrorChargeMissing);
    }

    #[tokio::test]
    async fn known_transaction_is_cancelled() {
        let (store, service) = setup().await;
        let charge = store
            .insert_charge(
                Charge::new(1, 100, "r", "d")
                    .with_status(ChargeStatus::AuthorisationError)
                    .with_gateway_transaction_id("sandbox-tx"),
            )
            .await
            .unwrap();
        let cleaned = service.cleanup_by_external_id(&charge.external_id).await.unwrap();
        assert_eq!(cleaned.status, ChargeStatus::AuthorisationErrorCancelled);
    }

    #[tokio::test]
    async fn other_statuses_are_left_alone() {
        let (store, service) = setup().await;
        let charge = store
            .insert_charge(Charge::new(1, 100, "r", "d").with_status(ChargeStatus::Captured))
            .await
            .unwrap();
        assert!(matches!(
            service.cleanup(charge).await,
            Err(ChargeError::IllegalState { .. })
        ));
    }
}
