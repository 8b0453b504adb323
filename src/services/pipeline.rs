//! Transactional operation pipeline
//!
//! Every lifecycle operation that talks to a gateway is split into three
//! steps. `pre_operation` validates the charge and durably claims it with a
//! lock status. `gateway_operation` calls the gateway and never writes.
//! `post_operation` durably records whatever the gateway said, including
//! faults, so a charge is never left in a lock status by a gateway error.

use crate::charges::{Charge, ChargeStatus, GatewayAccount, StatusFlow};
use crate::database::{ChargeStore, DatabaseError, StatusChange};
use crate::error::{ChargeError, ChargeResult};
use crate::payments::{GatewayRegistry, GatewayResponse, PaymentGateway};
use crate::services::notifier::StatusChangeNotifier;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

// ============================================================================
// Operation contract
// ============================================================================

/// Result of the durable pre-operation step.
#[derive(Debug)]
pub enum PreOperation<C, O> {
    /// Charge is claimed, continue with the gateway call.
    Proceed(C),
    /// Nothing left to do at the gateway; this is the final output.
    Completed(O),
}

#[async_trait]
pub trait TransactionalOperation: Send + Sync {
    type Request: Send + 'static;
    type Context: Send + Sync + 'static;
    type GatewayOutcome: Send + 'static;
    type Output: Send + 'static;

    fn name(&self) -> &'static str;

    async fn pre_operation(
        &self,
        request: Self::Request,
    ) -> ChargeResult<PreOperation<Self::Context, Self::Output>>;

    async fn gateway_operation(
        &self,
        context: &Self::Context,
    ) -> GatewayResponse<Self::GatewayOutcome>;

    async fn post_operation(
        &self,
        context: Self::Context,
        response: GatewayResponse<Self::GatewayOutcome>,
    ) -> ChargeResult<Self::Output>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    Durable,
    Gateway,
}

impl StepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::Durable => "durable",
            StepKind::Gateway => "gateway",
        }
    }
}

pub struct TransactionPipeline;

impl TransactionPipeline {
    /// Runs the three steps in order, stopping at the first error.
    pub async fn run<O>(operation: &O, request: O::Request) -> ChargeResult<O::Output>
    where
        O: TransactionalOperation + ?Sized,
    {
        let name = operation.name();

        debug!(operation = name, step = "pre_operation", kind = StepKind::Durable.as_str(), "pipeline step");
        let context = match operation.pre_operation(request).await? {
            PreOperation::Proceed(context) => context,
            PreOperation::Completed(output) => {
                debug!(operation = name, "pipeline completed before gateway call");
                return Ok(output);
            }
        };

        debug!(operation = name, step = "gateway_operation", kind = StepKind::Gateway.as_str(), "pipeline step");
        let response = operation.gateway_operation(&context).await;

        debug!(operation = name, step = "post_operation", kind = StepKind::Durable.as_str(), "pipeline step");
        operation.post_operation(context, response).await
    }
}

// ============================================================================
// Shared durable steps
// ============================================================================

/// Which charges an operation may claim and the lock status it claims them with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockSpec {
    pub operation: &'static str,
    pub sources: &'static [ChargeStatus],
    pub lock: ChargeStatus,
    pub cancellation: bool,
}

impl From<&StatusFlow> for LockSpec {
    fn from(flow: &StatusFlow) -> Self {
        LockSpec {
            operation: flow.name,
            sources: flow.sources,
            lock: flow.lock,
            cancellation: true,
        }
    }
}

/// A charge this operation now owns, and the status it was claimed from.
#[derive(Debug, Clone)]
pub struct LockedCharge {
    pub charge: Charge,
    pub previous_status: ChargeStatus,
}

pub async fn load_charge(store: &dyn ChargeStore, external_id: &str) -> ChargeResult<Charge> {
    store
        .find_by_external_id(external_id)
        .await?
        .ok_or_else(|| ChargeError::charge_not_found(external_id))
}

/// Decides whether `charge` can be claimed by `spec`.
pub fn check_lockable(charge: &Charge, spec: &LockSpec) -> ChargeResult<()> {
    let status = charge.status;
    if status == spec.lock || (spec.cancellation && StatusFlow::is_cancellation_in_progress(status)) {
        return Err(ChargeError::OperationAlreadyInProgress {
            charge_external_id: charge.external_id.clone(),
            operation: spec.operation,
        });
    }
    if spec.sources.contains(&status) {
        return Ok(());
    }
    if status == ChargeStatus::Expired {
        return Err(ChargeError::Expired {
            charge_external_id: charge.external_id.clone(),
        });
    }
    Err(ChargeError::IllegalState {
        charge_external_id: charge.external_id.clone(),
        operation: spec.operation,
        status,
    })
}

/// Durably moves `charge` into `spec.lock`. A concurrent writer makes the
/// first attempt conflict; the charge is then reloaded and checked once more.
pub async fn lock_charge(
    store: &dyn ChargeStore,
    charge: Charge,
    spec: &LockSpec,
) -> ChargeResult<LockedCharge> {
    let mut charge = charge;
    for attempt in 0..2 {
        check_lockable(&charge, spec)?;
        let previous_status = charge.status;
        match store
            .commit_status_change(&charge, StatusChange::to(spec.lock))
            .await
        {
            Ok(locked) => {
                info!(
                    charge_external_id = %locked.external_id,
                    operation = spec.operation,
                    from_status = %previous_status,
                    to_status = %spec.lock,
                    "charge locked"
                );
                return Ok(LockedCharge {
                    charge: locked,
                    previous_status,
                });
            }
            Err(DatabaseError::Conflict { .. }) if attempt == 0 => {
                debug!(
                    charge_external_id = %charge.external_id,
                    operation = spec.operation,
                    "lock conflicted, reloading charge"
                );
                charge = store.reload(charge.id).await?;
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(ChargeError::Conflict {
        entity: "charge",
        id: charge.external_id,
    })
}

/// Commits a status change, logs it and fires the notifier for terminal
/// statuses once the write is durable.
pub async fn commit_transition(
    store: &dyn ChargeStore,
    notifier: &dyn StatusChangeNotifier,
    charge: &Charge,
    operation: &'static str,
    change: StatusChange,
) -> ChargeResult<Charge> {
    let from = charge.status;
    let to = change.to;
    if !from.can_transition_to(to) {
        return Err(ChargeError::IllegalState {
            charge_external_id: charge.external_id.clone(),
            operation,
            status: from,
        });
    }

    let updated = store.commit_status_change(charge, change).await?;
    info!(
        charge_external_id = %updated.external_id,
        operation,
        from_status = %from,
        to_status = %to,
        "charge status committed"
    );

    if to.is_terminal() {
        notifier.on_terminal_status_reached(&updated, from, to).await;
    }
    Ok(updated)
}

/// The account a charge was taken on and the gateway serving it.
pub async fn resolve_gateway(
    store: &dyn ChargeStore,
    registry: &GatewayRegistry,
    charge: &Charge,
) -> ChargeResult<(GatewayAccount, Arc<dyn PaymentGateway>)> {
    let account = store
        .find_gateway_account(charge.gateway_account_id)
        .await?
        .ok_or_else(|| ChargeError::NotFound {
            entity: "gateway_account",
            id: charge.gateway_account_id.to_string(),
        })?;
    let gateway = registry.get(account.gateway)?;
    Ok((account, gateway))
}
