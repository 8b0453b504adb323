use crate::charges::{Charge, ChargeStatus, GatewayAccount};
use crate::database::{ChargeStore, StatusChange};
use crate::error::{ChargeError, ChargeResult};
use crate::payments::types::{CaptureOutcome, TransactionRequest};
use crate::payments::{GatewayRegistry, GatewayResponse, PaymentGateway};
use crate::services::notifier::StatusChangeNotifier;
use crate::services::pipeline::{
    check_lockable, commit_transition, load_charge, lock_charge, resolve_gateway, LockSpec,
    PreOperation, TransactionPipeline, TransactionalOperation,
};
use crate::services::LifecycleConfig;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

const CAPTURE: LockSpec = LockSpec {
    operation: "capture",
    sources: &ChargeStatus::CAPTURABLE,
    lock: ChargeStatus::CaptureReady,
    cancellation: false,
};

const APPROVE_CAPTURE: LockSpec = LockSpec {
    operation: "approve_capture",
    sources: &ChargeStatus::CAPTURE_APPROVABLE,
    lock: ChargeStatus::CaptureApproved,
    cancellation: false,
};

const AWAIT_CAPTURE_REQUEST: LockSpec = LockSpec {
    operation: "await_capture_request",
    sources: &[ChargeStatus::AuthorisationSuccess],
    lock: ChargeStatus::AwaitingCaptureRequest,
    cancellation: false,
};

pub struct CaptureContext {
    charge: Charge,
    account: GatewayAccount,
    gateway: Arc<dyn PaymentGateway>,
    transaction_id: String,
}

struct CaptureOperation<'a> {
    service: &'a CardCaptureService,
}

#[async_trait]
impl TransactionalOperation for CaptureOperation<'_> {
    type Request = Charge;
    type Context = CaptureContext;
    type GatewayOutcome = CaptureOutcome;
    type Output = Charge;

    fn name(&self) -> &'static str {
        CAPTURE.operation
    }

    async fn pre_operation(&self, charge: Charge) -> ChargeResult<PreOperation<CaptureContext, Charge>> {
        let store = self.service.store.as_ref();
        let charge = store.reload(charge.id).await?;
        check_lockable(&charge, &CAPTURE)?;
        let transaction_id = charge
            .gateway_transaction_id
            .clone()
            .ok_or_else(|| ChargeError::Validation {
                message: format!(
                    "charge {} has no gateway transaction to capture",
                    charge.external_id
                ),
            })?;
        let (account, gateway) = resolve_gateway(store, &self.service.registry, &charge).await?;
        let locked = lock_charge(store, charge, &CAPTURE).await?;

        Ok(PreOperation::Proceed(CaptureContext {
            charge: locked.charge,
            account,
            gateway,
            transaction_id,
        }))
    }

    async fn gateway_operation(&self, context: &CaptureContext) -> GatewayResponse<CaptureOutcome> {
        context
            .gateway
            .capture(TransactionRequest {
                charge_external_id: context.charge.external_id.clone(),
                gateway_transaction_id: context.transaction_id.clone(),
                amount: context.charge.amount,
                account: context.account.clone(),
            })
            .await
    }

    async fn post_operation(
        &self,
        context: CaptureContext,
        response: GatewayResponse<CaptureOutcome>,
    ) -> ChargeResult<Charge> {
        let store = self.service.store.as_ref();
        let notifier = self.service.notifier.as_ref();
        let charge = context.charge;

        let status = match response {
            Ok(CaptureOutcome::Submitted) => ChargeStatus::CaptureSubmitted,
            Ok(CaptureOutcome::Rejected { reason }) => {
                let retries = self.service.capture_retries(&charge).await?;
                let next = if retries < self.service.config.max_capture_retries {
                    ChargeStatus::CaptureApprovedRetry
                } else {
                    ChargeStatus::CaptureError
                };
                warn!(
                    charge_external_id = %charge.external_id,
                    reason = reason.as_deref().unwrap_or("none"),
                    retries,
                    next_status = %next,
                    "capture rejected by gateway"
                );
                next
            }
            Err(e) => {
                warn!(
                    charge_external_id = %charge.external_id,
                    error = %e,
                    "capture outcome unknown after gateway fault"
                );
                commit_transition(
                    store,
                    notifier,
                    &charge,
                    CAPTURE.operation,
                    StatusChange::to(ChargeStatus::CaptureUnknown),
                )
                .await?;
                return Err(ChargeError::GatewayFault(e));
            }
        };

        commit_transition(store, notifier, &charge, CAPTURE.operation, StatusChange::to(status)).await
    }
}

/// Capture approval and submission.
pub struct CardCaptureService {
    store: Arc<dyn ChargeStore>,
    registry: Arc<GatewayRegistry>,
    notifier: Arc<dyn StatusChangeNotifier>,
    config: LifecycleConfig,
}

impl CardCaptureService {
    pub fn new(
        store: Arc<dyn ChargeStore>,
        registry: Arc<GatewayRegistry>,
        notifier: Arc<dyn StatusChangeNotifier>,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            store,
            registry,
            notifier,
            config,
        }
    }

    /// Marks an authorised charge ready for the capture sweep. No gateway call.
    pub async fn approve_capture(&self, charge_external_id: &str) -> ChargeResult<Charge> {
        self.move_without_gateway(charge_external_id, &APPROVE_CAPTURE)
            .await
    }

    /// Parks a delayed-capture charge until the merchant asks for capture.
    pub async fn mark_awaiting_capture_request(&self, charge_external_id: &str) -> ChargeResult<Charge> {
        self.move_without_gateway(charge_external_id, &AWAIT_CAPTURE_REQUEST)
            .await
    }

    pub async fn capture(&self, charge_external_id: &str) -> ChargeResult<Charge> {
        let charge = load_charge(self.store.as_ref(), charge_external_id).await?;
        self.capture_charge(charge).await
    }

    /// Captures a charge already loaded by the caller, e.g. a sweep batch.
    pub async fn capture_charge(&self, charge: Charge) -> ChargeResult<Charge> {
        TransactionPipeline::run(&CaptureOperation { service: self }, charge).await
    }

    async fn move_without_gateway(&self, charge_external_id: &str, spec: &LockSpec) -> ChargeResult<Charge> {
        let charge = load_charge(self.store.as_ref(), charge_external_id).await?;
        if charge.status == spec.lock {
            info!(charge_external_id = %charge.external_id, status = %charge.status, "no status change needed");
            return Ok(charge);
        }
        check_lockable(&charge, spec)?;
        commit_transition(
            self.store.as_ref(),
            self.notifier.as_ref(),
            &charge,
            spec.operation,
            StatusChange::to(spec.lock),
        )
        .await
    }

    /// Number of earlier rejected capture attempts for this charge.
    async fn capture_retries(&self, charge: &Charge) -> ChargeResult<u32> {
        let events = self.store.find_events(charge.id).await?;
        Ok(events
            .iter()
            .filter(|e| e.status == ChargeStatus::CaptureApprovedRetry)
            .count() as u32)
    }
}
