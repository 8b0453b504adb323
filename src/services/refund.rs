use crate::charges::{
    refund_availability, Charge, ChargeStatus, GatewayAccount, Refund, RefundAvailability,
    RefundStatus,
};
use crate::database::{ChargeStore, DatabaseError, RefundStatusChange};
use crate::error::{ChargeError, ChargeResult};
use crate::payments::types::{RefundOutcome, RefundRequest};
use crate::payments::{GatewayRegistry, GatewayResponse, PaymentGateway};
use crate::services::notifier::StatusChangeNotifier;
use crate::services::pipeline::{
    load_charge, resolve_gateway, PreOperation, TransactionPipeline, TransactionalOperation,
};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize)]
pub struct RefundResult {
    pub charge_external_id: String,
    pub refund_external_id: String,
    pub amount: i64,
    pub status: RefundStatus,
    pub gateway_reference: Option<String>,
}

pub struct RefundInput {
    charge_external_id: String,
    amount: i64,
    expected_available: Option<i64>,
}

pub struct RefundContext {
    charge: Charge,
    refund: Refund,
    account: GatewayAccount,
    gateway: Arc<dyn PaymentGateway>,
    transaction_id: String,
}

struct RefundOperation<'a> {
    service: &'a ChargeRefundService,
}

#[async_trait]
impl TransactionalOperation for RefundOperation<'_> {
    type Request = RefundInput;
    type Context = RefundContext;
    type GatewayOutcome = RefundOutcome;
    type Output = RefundResult;

    fn name(&self) -> &'static str {
        "refund"
    }

    async fn pre_operation(
        &self,
        input: RefundInput,
    ) -> ChargeResult<PreOperation<RefundContext, RefundResult>> {
        let store = self.service.store.as_ref();
        if input.amount <= 0 {
            return Err(ChargeError::Validation {
                message: "refund amount must be positive".to_string(),
            });
        }

        let mut charge = load_charge(store, &input.charge_external_id).await?;
        let (account, gateway) = resolve_gateway(store, &self.service.registry, &charge).await?;

        for attempt in 0..2 {
            let transaction_id = refundable_transaction(&charge)?;
            let refunds = store.find_refunds_for_charge(charge.id).await?;
            let availability = refund_availability(&charge, &refunds);
            check_availability(&charge, availability, input.amount, input.expected_available)?;

            match store
                .insert_refund(&charge, Refund::new(charge.id, input.amount))
                .await
            {
                Ok(refund) => {
                    info!(
                        charge_external_id = %charge.external_id,
                        refund_external_id = %refund.external_id,
                        amount = refund.amount,
                        amount_available = availability.amount_available(),
                        "refund created"
                    );
                    return Ok(PreOperation::Proceed(RefundContext {
                        charge,
                        refund,
                        account,
                        gateway,
                        transaction_id,
                    }));
                }
                Err(DatabaseError::Conflict { .. }) if attempt == 0 => {
                    charge = store.reload(charge.id).await?;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(ChargeError::Conflict {
            entity: "charge",
            id: input.charge_external_id,
        })
    }

    async fn gateway_operation(&self, context: &RefundContext) -> GatewayResponse<RefundOutcome> {
        context
            .gateway
            .refund(RefundRequest {
                charge_external_id: context.charge.external_id.clone(),
                refund_external_id: context.refund.external_id.clone(),
                gateway_transaction_id: context.transaction_id.clone(),
                amount: context.refund.amount,
                account: context.account.clone(),
            })
            .await
    }

    async fn post_operation(
        &self,
        context: RefundContext,
        response: GatewayResponse<RefundOutcome>,
    ) -> ChargeResult<RefundResult> {
        let (change, fault) = match response {
            Ok(RefundOutcome::Completed { reference }) => (
                RefundStatusChange::to(RefundStatus::Refunded).with_gateway_reference(Some(&reference)),
                None,
            ),
            Ok(RefundOutcome::Submitted { reference }) => (
                RefundStatusChange::to(RefundStatus::RefundSubmitted)
                    .with_gateway_reference(Some(&reference)),
                None,
            ),
            Ok(RefundOutcome::Rejected { reason }) => {
                warn!(
                    charge_external_id = %context.charge.external_id,
                    refund_external_id = %context.refund.external_id,
                    reason = reason.as_deref().unwrap_or("none"),
                    "refund rejected by gateway"
                );
                (RefundStatusChange::to(RefundStatus::RefundError), None)
            }
            Err(e) => {
                warn!(
                    charge_external_id = %context.charge.external_id,
                    refund_external_id = %context.refund.external_id,
                    error = %e,
                    "refund failed at gateway"
                );
                (RefundStatusChange::to(RefundStatus::RefundError), Some(e))
            }
        };

        let refund = commit_refund_transition(
            self.service.store.as_ref(),
            self.service.notifier.as_ref(),
            &context.charge,
            &context.refund,
            change,
        )
        .await?;

        if let Some(e) = fault {
            return Err(ChargeError::GatewayFault(e));
        }
        Ok(RefundResult {
            charge_external_id: context.charge.external_id,
            refund_external_id: refund.external_id,
            amount: refund.amount,
            status: refund.status,
            gateway_reference: refund.gateway_reference,
        })
    }
}

fn refundable_transaction(charge: &Charge) -> ChargeResult<String> {
    if !ChargeStatus::REFUNDABLE.contains(&charge.status) {
        return Err(ChargeError::IllegalState {
            charge_external_id: charge.external_id.clone(),
            operation: "refund",
            status: charge.status,
        });
    }
    charge
        .gateway_transaction_id
        .clone()
        .ok_or_else(|| ChargeError::IllegalState {
            charge_external_id: charge.external_id.clone(),
            operation: "refund",
            status: charge.status,
        })
}

fn check_availability(
    charge: &Charge,
    availability: RefundAvailability,
    amount: i64,
    expected_available: Option<i64>,
) -> ChargeResult<()> {
    let not_available = |reason: String| ChargeError::RefundNotAvailable {
        charge_external_id: charge.external_id.clone(),
        reason,
    };

    let available = match availability {
        RefundAvailability::Available { amount_available } => amount_available,
        RefundAvailability::Full => {
            return Err(not_available("charge has been fully refunded".to_string()))
        }
        RefundAvailability::Unavailable => {
            return Err(not_available("charge is not refundable".to_string()))
        }
    };

    if let Some(expected) = expected_available {
        if expected != available {
            return Err(not_available(format!(
                "refund availability changed: expected {}, actual {}",
                expected, available
            )));
        }
    }
    if amount > available {
        return Err(not_available(format!(
            "requested {} but only {} is available",
            amount, available
        )));
    }
    Ok(())
}

/// Commits a refund status change and notifies on terminal refund statuses.
pub async fn commit_refund_transition(
    store: &dyn ChargeStore,
    notifier: &dyn StatusChangeNotifier,
    charge: &Charge,
    refund: &Refund,
    change: RefundStatusChange,
) -> ChargeResult<Refund> {
    let from = refund.status;
    let to = change.to;
    if !from.can_transition_to(to) {
        return Err(ChargeError::Validation {
            message: format!(
                "refund {} cannot move from {} to {}",
                refund.external_id, from, to
            ),
        });
    }

    let updated = store.commit_refund_status_change(refund, change).await?;
    info!(
        charge_external_id = %charge.external_id,
        refund_external_id = %updated.external_id,
        from_status = %from,
        to_status = %to,
        "refund status committed"
    );
    if to.is_terminal() {
        notifier
            .on_refund_status_reached(charge, &updated, from, to)
            .await;
    }
    Ok(updated)
}

pub struct ChargeRefundService {
    store: Arc<dyn ChargeStore>,
    registry: Arc<GatewayRegistry>,
    notifier: Arc<dyn StatusChangeNotifier>,
}

impl ChargeRefundService {
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

    /// Refunds `amount` of a captured charge. When `expected_available` is
    /// given the refund only goes ahead if it still matches the amount left.
    pub async fn refund(
        &self,
        charge_external_id: &str,
        amount: i64,
        expected_available: Option<i64>,
    ) -> ChargeResult<RefundResult> {
        let input = RefundInput {
            charge_external_id: charge_external_id.to_string(),
            amount,
            expected_available,
        };
        TransactionPipeline::run(&RefundOperation { service: self }, input).await
    }

    pub async fn availability(&self, charge_external_id: &str) -> ChargeResult<RefundAvailability> {
        let charge = load_charge(self.store.as_ref(), charge_external_id).await?;
        let refunds = self.store.find_refunds_for_charge(charge.id).await?;
        Ok(refund_availability(&charge, &refunds))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::InMemoryChargeStore;
    use crate::payments::gateways::SandboxGateway;
    use crate::payments::GatewayName;
    use crate::services::notifier::LoggingStatusChangeNotifier;

    async fn setup(status: ChargeStatus) -> (Arc<InMemoryChargeStore>, ChargeRefundService, Charge) {
        let store = Arc::new(InMemoryChargeStore::new());
        store
            .insert_gateway_account(GatewayAccount::new(1, GatewayName::Sandbox))
            .await;
        let charge = store
            .insert_charge(
                Charge::new(1, 1000, "r", "d")
                    .with_status(status)
                    .with_gateway_transaction_id("sandbox-tx"),
            )
            .await
            .unwrap();
        let service = ChargeRefundService::new(
            store.clone(),
            Arc::new(GatewayRegistry::new().with_gateway(Arc::new(SandboxGateway::default()))),
            Arc::new(LoggingStatusChangeNotifier::new()),
        );
        (store, service, charge)
    }

    #[tokio::test]
    async fn partial_refunds_reduce_availability() {
        let (_store, service, charge) = setup(ChargeStatus::Captured).await;

        let first = service.refund(&charge.external_id, 400, Some(1000)).await.unwrap();
        assert_eq!(first.status, RefundStatus::Refunded);
        assert!(first.gateway_reference.is_some());

        assert_eq!(
            service.availability(&charge.external_id).await.unwrap(),
            RefundAvailability::Available { amount_available: 600 }
        );

        let too_much = service.refund(&charge.external_id, 601, None).await;
        assert!(matches!(too_much, Err(ChargeError::RefundNotAvailable { .. })));

        service.refund(&charge.external_id, 600, None).await.unwrap();
        assert_eq!(
            service.availability(&charge.external_id).await.unwrap(),
            RefundAvailability::Full
        );
    }

    #[tokio::test]
    async fn stale_expected_availability_is_rejected() {
        let (_store, service, charge) = setup(ChargeStatus::Captured).await;
        service.refund(&charge.external_id, 100, None).await.unwrap();

        let stale = service.refund(&charge.external_id, 100, Some(1000)).await;
        assert!(matches!(stale, Err(ChargeError::RefundNotAvailable { .. })));
    }

    #[tokio::test]
    async fn uncaptured_charges_cannot_be_refunded() {
        let (_store, service, charge) = setup(ChargeStatus::AuthorisationSuccess).await;
        let result = service.refund(&charge.external_id, 100, None).await;
        assert!(matches!(result, Err(ChargeError::IllegalState { .. })));
    }

    #[tokio::test]
    async fn zero_amount_is_invalid() {
        let (_store, service, charge) = setup(ChargeStatus::Captured).await;
        let result = service.refund(&charge.external_id, 0, None).await;
        assert!(matches!(result, Err(ChargeError::Validation { .. })));
    }
}
