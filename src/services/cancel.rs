use crate::charges::{Charge, ChargeStatus, GatewayAccount, StatusFlow};
use crate::database::{ChargeStore, StatusChange};
use crate::error::{ChargeError, ChargeResult};
use crate::payments::types::{CancelOutcome, TransactionRequest};
use crate::payments::{GatewayRegistry, GatewayResponse, PaymentGateway};
use crate::services::notifier::StatusChangeNotifier;
use crate::services::pipeline::{
    check_lockable, commit_transition, load_charge, lock_charge, resolve_gateway, LockSpec,
    PreOperation, TransactionPipeline, TransactionalOperation,
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

pub struct CancelContext {
    charge: Charge,
    account: GatewayAccount,
    gateway: Arc<dyn PaymentGateway>,
    transaction_id: String,
}

struct CancelOperation<'a> {
    service: &'a ChargeCancelService,
    flow: StatusFlow,
}

impl CancelOperation<'_> {
    /// Charges the gateway never saw are cancelled without calling it.
    async fn cancel_before_gateway(&self, charge: Charge) -> ChargeResult<Option<Charge>> {
        let store = self.service.store.as_ref();
        let notifier = self.service.notifier.as_ref();
        let mut charge = charge;

        for attempt in 0..2 {
            if !ChargeStatus::PRE_GATEWAY.contains(&charge.status) || !self.flow.is_source(charge.status) {
                return Ok(None);
            }
            match commit_transition(
                store,
                notifier,
                &charge,
                self.flow.name,
                StatusChange::to(self.flow.success),
            )
            .await
            {
                Ok(cancelled) => return Ok(Some(cancelled)),
                Err(ChargeError::Conflict { .. }) if attempt == 0 => {
                    charge = store.reload(charge.id).await?;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl TransactionalOperation for CancelOperation<'_> {
    type Request = Charge;
    type Context = CancelContext;
    type GatewayOutcome = CancelOutcome;
    type Output = Charge;

    fn name(&self) -> &'static str {
        self.flow.name
    }

    async fn pre_operation(&self, charge: Charge) -> ChargeResult<PreOperation<CancelContext, Charge>> {
        let store = self.service.store.as_ref();
        let spec = LockSpec::from(&self.flow);

        let charge = match self.cancel_before_gateway(charge.clone()).await? {
            Some(cancelled) => return Ok(PreOperation::Completed(cancelled)),
            None => store.reload(charge.id).await?,
        };
        check_lockable(&charge, &spec)?;

        let Some(transaction_id) = charge.gateway_transaction_id.clone() else {
            // Nothing the gateway could cancel: claim the charge and finish here.
            let locked = lock_charge(store, charge, &spec).await?;
            let cancelled = commit_transition(
                store,
                self.service.notifier.as_ref(),
                &locked.charge,
                self.flow.name,
                StatusChange::to(self.flow.success),
            )
            .await?;
            return Ok(PreOperation::Completed(cancelled));
        };

        let (account, gateway) = resolve_gateway(store, &self.service.registry, &charge).await?;
        let locked = lock_charge(store, charge, &spec).await?;
        Ok(PreOperation::Proceed(CancelContext {
            charge: locked.charge,
            account,
            gateway,
            transaction_id,
        }))
    }

    async fn gateway_operation(&self, context: &CancelContext) -> GatewayResponse<CancelOutcome> {
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
        context: CancelContext,
        response: GatewayResponse<CancelOutcome>,
    ) -> ChargeResult<Charge> {
        let store = self.service.store.as_ref();
        let notifier = self.service.notifier.as_ref();
        let charge = context.charge;

        let (status, fault) = match response {
            Ok(CancelOutcome::Cancelled) => (self.flow.success, None),
            Ok(CancelOutcome::Submitted) => (self.flow.submitted, None),
            Ok(CancelOutcome::Rejected { reason }) => {
                warn!(
                    charge_external_id = %charge.external_id,
                    flow = self.flow.name,
                    reason = reason.as_deref().unwrap_or("none"),
                    "cancellation rejected by gateway"
                );
                (self.flow.failure, None)
            }
            Err(e) => {
                warn!(
                    charge_external_id = %charge.external_id,
                    flow = self.flow.name,
                    error = %e,
                    "cancellation failed at gateway"
                );
                (self.flow.failure, Some(e))
            }
        };

        let updated = commit_transition(store, notifier, &charge, self.flow.name, StatusChange::to(status)).await?;
        match fault {
            Some(e) => Err(ChargeError::GatewayFault(e)),
            None => Ok(updated),
        }
    }
}

/// User cancellation, system cancellation and expiry of charges that have
/// not been captured.
pub struct ChargeCancelService {
    store: Arc<dyn ChargeStore>,
    registry: Arc<GatewayRegistry>,
    notifier: Arc<dyn StatusChangeNotifier>,
}

impl ChargeCancelService {
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

    pub async fn user_cancel(&self, charge_external_id: &str) -> ChargeResult<Charge> {
        self.cancel(charge_external_id, StatusFlow::USER_CANCELLATION)
            .await
    }

    pub async fn system_cancel(&self, charge_external_id: &str) -> ChargeResult<Charge> {
        self.cancel(charge_external_id, StatusFlow::SYSTEM_CANCELLATION)
            .await
    }

    pub async fn expire(&self, charge_external_id: &str) -> ChargeResult<Charge> {
        self.cancel(charge_external_id, StatusFlow::EXPIRE).await
    }

    /// Runs `flow` against a charge already loaded by the caller.
    pub async fn cancel_charge(&self, charge: Charge, flow: StatusFlow) -> ChargeResult<Charge> {
        info!(
            charge_external_id = %charge.external_id,
            flow = flow.name,
            status = %charge.status,
            "cancelling charge"
        );
        TransactionPipeline::run(&CancelOperation { service: self, flow }, charge).await
    }

    async fn cancel(&self, charge_external_id: &str, flow: StatusFlow) -> ChargeResult<Charge> {
        let charge = load_charge(self.store.as_ref(), charge_external_id).await?;
        self.cancel_charge(charge, flow).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::InMemoryChargeStore;
    use crate::payments::gateways::SandboxGateway;
    use crate::payments::GatewayName;
    use crate::services::notifier::LoggingStatusChangeNotifier;

    async fn setup() -> (Arc<InMemoryChargeStore>, ChargeCancelService) {
        let store = Arc::new(InMemoryChargeStore::new());
        store
            .insert_gateway_account(GatewayAccount::new(1, GatewayName::Sandbox))
            .await;
        let service = ChargeCancelService::new(
            store.clone(),
            Arc::new(GatewayRegistry::new().with_gateway(Arc::new(SandboxGateway::default()))),
            Arc::new(LoggingStatusChangeNotifier::new()),
        );
        (store, service)
    }

    #[tokio::test]
    async fn created_charge_is_cancelled_without_lock() {
        let (store, service) = setup().await;
        let charge = store.insert_charge(Charge::new(1, 100, "r", "d")).await.unwrap();

        let cancelled = service.user_cancel(&charge.external_id).await.unwrap();
        assert_eq!(cancelled.status, ChargeStatus::UserCancelled);

        let statuses: Vec<ChargeStatus> = store
            .find_events(charge.id)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.status)
            .collect();
        assert_eq!(statuses, vec![ChargeStatus::Created, ChargeStatus::UserCancelled]);
    }

    #[tokio::test]
    async fn authorised_charge_goes_through_gateway() {
        let (store, service) = setup().await;
        let charge = store
            .insert_charge(
                Charge::new(1, 100, "r", "d")
                    .with_status(ChargeStatus::AuthorisationSuccess)
                    .with_gateway_transaction_id("sandbox-tx"),
            )
            .await
            .unwrap();

        let expired = service.expire(&charge.external_id).await.unwrap();
        assert_eq!(expired.status, ChargeStatus::Expired);

        let statuses: Vec<ChargeStatus> = store
            .find_events(charge.id)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.status)
            .collect();
        assert_eq!(
            statuses,
            vec![
                ChargeStatus::AuthorisationSuccess,
                ChargeStatus::ExpireCancelReady,
                ChargeStatus::Expired
            ]
        );
    }

    #[tokio::test]
    async fn expired_charge_cannot_be_cancelled() {
        let (store, service) = setup().await;
        let charge = store
            .insert_charge(Charge::new(1, 100, "r", "d").with_status(ChargeStatus::Expired))
            .await
            .unwrap();
        let result = service.user_cancel(&charge.external_id).await;
        assert!(matches!(result, Err(ChargeError::Expired { .. })));
    }

    #[tokio::test]
    async fn users_cannot_cancel_awaiting_capture_request() {
        let (store, service) = setup().await;
        let charge = store
            .insert_charge(
                Charge::new(1, 100, "r", "d")
                    .with_status(ChargeStatus::AwaitingCaptureRequest)
                    .with_gateway_transaction_id("sandbox-tx"),
            )
            .await
            .unwrap();
        assert!(matches!(
            service.user_cancel(&charge.external_id).await,
            Err(ChargeError::IllegalState { .. })
        ));
        assert_eq!(
            service.system_cancel(&charge.external_id).await.unwrap().status,
            ChargeStatus::SystemCancelled
        );
    }
}
