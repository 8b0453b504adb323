use crate::charges::{Charge, ChargeEvent, ChargeStatus, GatewayAccount, Refund, RefundStatus};
use crate::database::error::DatabaseError;
use crate::payments::types::GatewayName;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

pub type StoreResult<T> = Result<T, DatabaseError>;

/// A durable status write. Committing one appends a `ChargeEvent`.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusChange {
    pub to: ChargeStatus,
    pub gateway_transaction_id: Option<String>,
    pub gateway_event_date: Option<DateTime<Utc>>,
}

impl StatusChange {
    pub fn to(status: ChargeStatus) -> Self {
        Self {
            to: status,
            gateway_transaction_id: None,
            gateway_event_date: None,
        }
    }

    pub fn with_gateway_transaction_id(mut self, transaction_id: Option<&str>) -> Self {
        self.gateway_transaction_id = transaction_id.map(str::to_string);
        self
    }

    pub fn with_event_date(mut self, event_date: Option<DateTime<Utc>>) -> Self {
        self.gateway_event_date = event_date;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RefundStatusChange {
    pub to: RefundStatus,
    pub gateway_reference: Option<String>,
}

impl RefundStatusChange {
    pub fn to(status: RefundStatus) -> Self {
        Self {
            to: status,
            gateway_reference: None,
        }
    }

    pub fn with_gateway_reference(mut self, reference: Option<&str>) -> Self {
        self.gateway_reference = reference.map(str::to_string);
        self
    }
}

/// Charges in any of `statuses` created before `created_before`, oldest first.
#[derive(Debug, Clone)]
pub struct SweepQuery {
    pub statuses: Vec<ChargeStatus>,
    pub created_before: DateTime<Utc>,
    pub limit: i64,
}

/// Persistence for charges, their events, refunds and gateway accounts.
///
/// Writes are compare-and-set on the version the caller read: a write based
/// on a stale copy fails with `DatabaseError::Conflict` and changes nothing.
#[async_trait]
pub trait ChargeStore: Send + Sync {
    async fn insert_charge(&self, charge: Charge) -> StoreResult<Charge>;

    async fn find_by_external_id(&self, external_id: &str) -> StoreResult<Option<Charge>>;

    async fn find_by_gateway_transaction_id(
        &self,
        gateway: GatewayName,
        transaction_id: &str,
    ) -> StoreResult<Option<Charge>>;

    /// Fresh copy of a charge by primary key.
    async fn reload(&self, charge_id: Uuid) -> StoreResult<Charge>;

    /// Writes `change` if `charge.version` is still current, bumping the
    /// version and appending an event. Returns the updated charge.
    async fn commit_status_change(&self, charge: &Charge, change: StatusChange)
        -> StoreResult<Charge>;

    async fn find_events(&self, charge_id: Uuid) -> StoreResult<Vec<ChargeEvent>>;

    async fn find_eligible_for_sweep(&self, query: &SweepQuery) -> StoreResult<Vec<Charge>>;

    async fn find_gateway_account(&self, account_id: i64) -> StoreResult<Option<GatewayAccount>>;

    /// Inserts `refund` against `charge`, checking and bumping the charge
    /// version in the same write so two refunds cannot both see the same
    /// availability.
    async fn insert_refund(&self, charge: &Charge, refund: Refund) -> StoreResult<Refund>;

    async fn find_refunds_for_charge(&self, charge_id: Uuid) -> StoreResult<Vec<Refund>>;

    async fn commit_refund_status_change(
        &self,
        refund: &Refund,
        change: RefundStatusChange,
    ) -> StoreResult<Refund>;

    /// Connectivity probe for health checks.
    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}
