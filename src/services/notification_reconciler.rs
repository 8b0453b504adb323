//! Notification reconciler
//!
//! Applies asynchronous gateway notifications to charges and refunds. A
//! notification only ever moves a charge along a legal edge of the state
//! machine and never touches a charge a pipeline currently holds locked.

use crate::charges::{is_legal_transition, Charge, ChargeStatus, RefundStatus};
use crate::database::{ChargeStore, RefundStatusChange, StatusChange};
use crate::error::{ChargeError, ChargeResult};
use crate::payments::types::{GatewayNotification, NotificationPolicy};
use crate::payments::{GatewayRegistry, InterpretedStatus, PaymentGateway};
use crate::services::notifier::StatusChangeNotifier;
use crate::services::pipeline::commit_transition;
use crate::services::refund::commit_refund_transition;
use crate::services::source_verifier::NotificationSourceVerifier;
use serde::Serialize;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{error, info, warn};

const OPERATION: &str = "notification";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum DropReason {
    MissingTransactionId,
    ChargeNotFound,
    GatewayAccountNotFound,
    VerificationFailed,
    Blacklisted { status: ChargeStatus },
    IllegalTransition { from: ChargeStatus, to: ChargeStatus },
    RefundNotFound,
    IllegalRefundTransition { from: RefundStatus, to: RefundStatus },
    Conflict,
    Storage { message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum NotificationOutcome {
    Applied {
        charge_external_id: String,
        status: String,
    },
    Ignored,
    Unknown,
    Dropped(DropReason),
}

/// What happened to one inbound notification request. `accepted` is false
/// only when the request was refused before its payload was read.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationReceipt {
    pub accepted: bool,
    pub outcomes: Vec<NotificationOutcome>,
}

impl NotificationReceipt {
    fn rejected() -> Self {
        Self {
            accepted: false,
            outcomes: Vec::new(),
        }
    }

    pub fn applied_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, NotificationOutcome::Applied { .. }))
            .count()
    }
}

pub struct NotificationReconciler {
    store: Arc<dyn ChargeStore>,
    registry: Arc<GatewayRegistry>,
    notifier: Arc<dyn StatusChangeNotifier>,
    verifier: NotificationSourceVerifier,
}

impl NotificationReconciler {
    pub fn new(
        store: Arc<dyn ChargeStore>,
        registry: Arc<GatewayRegistry>,
        notifier: Arc<dyn StatusChangeNotifier>,
        verifier: NotificationSourceVerifier,
    ) -> Self {
        Self {
            store,
            registry,
            notifier,
            verifier,
        }
    }

    /// True when the request was accepted, whatever happened to the
    /// individual notifications in it.
    pub async fn handle(&self, source_ip: Option<IpAddr>, gateway_name: &str, payload: &[u8]) -> bool {
        self.reconcile(source_ip, gateway_name, payload)
            .await
            .accepted
    }

    pub async fn reconcile(
        &self,
        source_ip: Option<IpAddr>,
        gateway_name: &str,
        payload: &[u8],
    ) -> NotificationReceipt {
        let Some(gateway) = self.registry.resolve(gateway_name) else {
            warn!(gateway = %gateway_name, "notification for unknown gateway");
            return NotificationReceipt::rejected();
        };

        let policy = gateway.notification_policy();
        if let Some(domain) = policy.trusted_domain.as_deref() {
            if !self.verifier.verify(source_ip, domain).await {
                warn!(
                    gateway = %gateway_name,
                    source_ip = ?source_ip,
                    trusted_domain = %domain,
                    "notification source failed domain verification"
                );
                return NotificationReceipt::rejected();
            }
        }

        let notifications = match gateway.parse_notification(payload) {
            Ok(notifications) => notifications,
            Err(e) => {
                warn!(gateway = %gateway_name, error = %e, "could not parse notification");
                return NotificationReceipt {
                    accepted: true,
                    outcomes: Vec::new(),
                };
            }
        };

        let mut outcomes = Vec::with_capacity(notifications.len());
        for notification in &notifications {
            let outcome = match self.apply(gateway.as_ref(), &policy, notification).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(
                        gateway = %gateway_name,
                        gateway_transaction_id = ?notification.transaction_id,
                        error = %e,
                        "failed to apply notification"
                    );
                    NotificationOutcome::Dropped(DropReason::Storage {
                        message: e.to_string(),
                    })
                }
            };
            outcomes.push(outcome);
        }

        info!(
            gateway = %gateway_name,
            received = notifications.len(),
            applied = outcomes
                .iter()
                .filter(|o| matches!(o, NotificationOutcome::Applied { .. }))
                .count(),
            "notification batch processed"
        );
        NotificationReceipt {
            accepted: true,
            outcomes,
        }
    }

    async fn apply(
        &self,
        gateway: &dyn PaymentGateway,
        policy: &NotificationPolicy,
        notification: &GatewayNotification,
    ) -> ChargeResult<NotificationOutcome> {
        let Some(transaction_id) = notification.transaction_id.as_deref() else {
            if policy.requires_transaction_id {
                warn!(gateway = %gateway.name(), status = %notification.status, "notification without transaction id");
                return Ok(NotificationOutcome::Dropped(DropReason::MissingTransactionId));
            }
            info!(gateway = %gateway.name(), status = %notification.status, "notification without transaction id ignored");
            return Ok(NotificationOutcome::Ignored);
        };

        let Some(mut charge) = self
            .store
            .find_by_gateway_transaction_id(gateway.name(), transaction_id)
            .await?
        else {
            warn!(gateway = %gateway.name(), gateway_transaction_id = %transaction_id, "notification for unknown charge");
            return Ok(NotificationOutcome::Dropped(DropReason::ChargeNotFound));
        };

        let Some(account) = self
            .store
            .find_gateway_account(charge.gateway_account_id)
            .await?
        else {
            error!(
                charge_external_id = %charge.external_id,
                gateway_account_id = charge.gateway_account_id,
                "charge references missing gateway account"
            );
            return Ok(NotificationOutcome::Dropped(DropReason::GatewayAccountNotFound));
        };

        if !gateway.verify_notification(notification, &account) {
            warn!(
                charge_external_id = %charge.external_id,
                gateway = %gateway.name(),
                "notification failed verification"
            );
            return Ok(NotificationOutcome::Dropped(DropReason::VerificationFailed));
        }

        // One retry: a concurrent writer may have moved the charge since we
        // read it, so the status is interpreted again against the new one.
        for attempt in 0..2 {
            let to = match gateway.status_mapper().interpret(&notification.status, charge.status) {
                InterpretedStatus::MappedCharge(to) => to,
                InterpretedStatus::MappedRefund(to) => {
                    return self.apply_refund(&charge, notification, to).await;
                }
                InterpretedStatus::Ignored => {
                    info!(
                        charge_external_id = %charge.external_id,
                        gateway_status = %notification.status,
                        "notification status ignored"
                    );
                    return Ok(NotificationOutcome::Ignored);
                }
                InterpretedStatus::Unknown | InterpretedStatus::Deferred(_) => {
                    warn!(
                        charge_external_id = %charge.external_id,
                        gateway_status = %notification.status,
                        current_status = %charge.status,
                        "notification status not understood"
                    );
                    return Ok(NotificationOutcome::Unknown);
                }
            };

            if let Some(dropped) = check_charge_transition(&charge, to) {
                return Ok(dropped);
            }

            let change = StatusChange::to(to).with_event_date(notification.event_date);
            match commit_transition(
                self.store.as_ref(),
                self.notifier.as_ref(),
                &charge,
                OPERATION,
                change,
            )
            .await
            {
                Ok(updated) => {
                    return Ok(NotificationOutcome::Applied {
                        charge_external_id: updated.external_id,
                        status: to.to_string(),
                    })
                }
                Err(ChargeError::Conflict { .. }) if attempt == 0 => {
                    charge = self.store.reload(charge.id).await?;
                }
                Err(ChargeError::Conflict { .. }) => break,
                Err(e) => return Err(e),
            }
        }

        warn!(charge_external_id = %charge.external_id, "notification lost a write race twice");
        Ok(NotificationOutcome::Dropped(DropReason::Conflict))
    }

    async fn apply_refund(
        &self,
        charge: &Charge,
        notification: &GatewayNotification,
        to: RefundStatus,
    ) -> ChargeResult<NotificationOutcome> {
        let Some(reference) = notification.reference.as_deref() else {
            warn!(charge_external_id = %charge.external_id, "refund notification without reference");
            return Ok(NotificationOutcome::Dropped(DropReason::RefundNotFound));
        };

        for attempt in 0..2 {
            let refunds = self.store.find_refunds_for_charge(charge.id).await?;
            let Some(refund) = refunds
                .into_iter()
                .find(|r| r.gateway_reference.as_deref() == Some(reference))
            else {
                warn!(
                    charge_external_id = %charge.external_id,
                    gateway_reference = %reference,
                    "notification for unknown refund"
                );
                return Ok(NotificationOutcome::Dropped(DropReason::RefundNotFound));
            };

            if refund.status == to {
                info!(refund_external_id = %refund.external_id, status = %to, "refund already in notified status");
                return Ok(NotificationOutcome::Ignored);
            }
            if !refund.status.can_transition_to(to) {
                warn!(
                    refund_external_id = %refund.external_id,
                    from_status = %refund.status,
                    to_status = %to,
                    "illegal refund transition from notification"
                );
                return Ok(NotificationOutcome::Dropped(DropReason::IllegalRefundTransition {
                    from: refund.status,
                    to,
                }));
            }

            match commit_refund_transition(
                self.store.as_ref(),
                self.notifier.as_ref(),
                charge,
                &refund,
                RefundStatusChange::to(to),
            )
            .await
            {
                Ok(_) => {
                    return Ok(NotificationOutcome::Applied {
                        charge_external_id: charge.external_id.clone(),
                        status: to.to_string(),
                    })
                }
                Err(ChargeError::Conflict { .. }) if attempt == 0 => continue,
                Err(ChargeError::Conflict { .. }) => break,
                Err(e) => return Err(e),
            }
        }

        Ok(NotificationOutcome::Dropped(DropReason::Conflict))
    }
}

/// `None` when `charge` may move to `to`, otherwise the outcome to report.
fn check_charge_transition(charge: &Charge, to: ChargeStatus) -> Option<NotificationOutcome> {
    let from = charge.status;
    if from == to {
        info!(charge_external_id = %charge.external_id, status = %to, "charge already in notified status");
        return Some(NotificationOutcome::Ignored);
    }
    if from.is_blacklisted_for_notifications() {
        warn!(
            charge_external_id = %charge.external_id,
            current_status = %from,
            notified_status = %to,
            "charge is locked by an operation, notification dropped"
        );
        return Some(NotificationOutcome::Dropped(DropReason::Blacklisted { status: from }));
    }
    if !is_legal_transition(from, to) {
        warn!(
            charge_external_id = %charge.external_id,
            from_status = %from,
            to_status = %to,
            "illegal transition from notification"
        );
        return Some(NotificationOutcome::Dropped(DropReason::IllegalTransition { from, to }));
    }
    None
}
