use crate::charges::{Charge, ChargeStatus, Refund, RefundStatus};
use async_trait::async_trait;
use tracing::{info, warn};

/// Outbound hook fired after a terminal status has been durably committed.
///
/// Implementations must not fail the caller: the status change is already
/// persisted by the time they run.
#[async_trait]
pub trait StatusChangeNotifier: Send + Sync {
    async fn on_terminal_status_reached(
        &self,
        charge: &Charge,
        old_status: ChargeStatus,
        new_status: ChargeStatus,
    );

    async fn on_refund_status_reached(
        &self,
        charge: &Charge,
        refund: &Refund,
        old_status: RefundStatus,
        new_status: RefundStatus,
    );
}

/// Default notifier: one structured log line per terminal transition.
pub struct LoggingStatusChangeNotifier;

impl LoggingStatusChangeNotifier {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LoggingStatusChangeNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StatusChangeNotifier for LoggingStatusChangeNotifier {
    async fn on_terminal_status_reached(
        &self,
        charge: &Charge,
        old_status: ChargeStatus,
        new_status: ChargeStatus,
    ) {
        match new_status.category() {
            crate::charges::StatusCategory::TerminalFailure => warn!(
                charge_external_id = %charge.external_id,
                reference = %charge.reference,
                amount = charge.amount,
                from_status = %old_status,
                to_status = %new_status,
                "🔔 charge finished unsuccessfully"
            ),
            _ => info!(
                charge_external_id = %charge.external_id,
                reference = %charge.reference,
                amount = charge.amount,
                from_status = %old_status,
                to_status = %new_status,
                "🔔 charge finished"
            ),
        }
    }

    async fn on_refund_status_reached(
        &self,
        charge: &Charge,
        refund: &Refund,
        old_status: RefundStatus,
        new_status: RefundStatus,
    ) {
        info!(
            charge_external_id = %charge.external_id,
            refund_external_id = %refund.external_id,
            amount = refund.amount,
            from_status = %old_status,
            to_status = %new_status,
            "🔔 refund finished"
        );
    }
}
