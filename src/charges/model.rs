use crate::charges::status::{ChargeStatus, RefundStatus};
use crate::payments::types::GatewayName;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// A payment attempt. `version` increases on every durable write and is the
/// basis of the optimistic concurrency checks in the charge store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Charge {
    pub id: Uuid,
    pub external_id: String,
    /// Minor currency units.
    pub amount: i64,
    pub status: ChargeStatus,
    pub gateway_account_id: i64,
    pub gateway_transaction_id: Option<String>,
    pub reference: String,
    pub description: String,
    pub delayed_capture: bool,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Charge {
    pub fn new(gateway_account_id: i64, amount: i64, reference: &str, description: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            external_id: Uuid::new_v4().simple().to_string(),
            amount,
            status: ChargeStatus::Created,
            gateway_account_id,
            gateway_transaction_id: None,
            reference: reference.to_string(),
            description: description.to_string(),
            delayed_capture: false,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_status(mut self, status: ChargeStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_gateway_transaction_id(mut self, transaction_id: &str) -> Self {
        self.gateway_transaction_id = Some(transaction_id.to_string());
        self
    }

    pub fn with_delayed_capture(mut self, delayed_capture: bool) -> Self {
        self.delayed_capture = delayed_capture;
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self.updated_at = created_at;
        self
    }
}

/// Append-only record of a committed status change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChargeEvent {
    pub charge_id: Uuid,
    pub status: ChargeStatus,
    pub gateway_event_date: Option<DateTime<Utc>>,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Refund {
    pub id: Uuid,
    pub external_id: String,
    pub charge_id: Uuid,
    pub amount: i64,
    pub status: RefundStatus,
    /// Correlates gateway notifications with this refund.
    pub gateway_reference: Option<String>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Refund {
    pub fn new(charge_id: Uuid, amount: i64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            external_id: Uuid::new_v4().simple().to_string(),
            charge_id,
            amount,
            status: RefundStatus::Created,
            gateway_reference: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Merchant account at a gateway, carrying the credentials the gateway
/// integration needs for calls and notification verification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GatewayAccount {
    pub id: i64,
    pub gateway: GatewayName,
    pub credentials: HashMap<String, String>,
    pub live: bool,
}

impl GatewayAccount {
    pub fn new(id: i64, gateway: GatewayName) -> Self {
        Self {
            id,
            gateway,
            credentials: HashMap::new(),
            live: false,
        }
    }

    pub fn with_credential(mut self, key: &str, value: &str) -> Self {
        self.credentials.insert(key.to_string(), value.to_string());
        self
    }

    pub fn credential(&self, key: &str) -> Option<&str> {
        self.credentials.get(key).map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefundAvailability {
    Available { amount_available: i64 },
    Full,
    Unavailable,
}

impl RefundAvailability {
    pub fn amount_available(&self) -> i64 {
        match self {
            RefundAvailability::Available { amount_available } => *amount_available,
            RefundAvailability::Full | RefundAvailability::Unavailable => 0,
        }
    }
}

/// Refundable amount left on a charge given every refund recorded against it.
pub fn refund_availability(charge: &Charge, refunds: &[Refund]) -> RefundAvailability {
    if !ChargeStatus::REFUNDABLE.contains(&charge.status) {
        return RefundAvailability::Unavailable;
    }

    let committed: i64 = refunds
        .iter()
        .filter(|r| r.charge_id == charge.id && r.status.counts_against_charge())
        .map(|r| r.amount)
        .sum();

    let remaining = charge.amount - committed;
    if remaining <= 0 {
        RefundAvailability::Full
    } else {
        RefundAvailability::Available {
            amount_available: remaining,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn captured_charge(amount: i64) -> Charge {
        Charge::new(1, amount, "ref", "desc").with_status(ChargeStatus::Captured)
    }

    #[test]
    fn uncaptured_charges_are_not_refundable() {
        let charge = Charge::new(1, 1000, "ref", "desc").with_status(ChargeStatus::AuthorisationSuccess);
        assert_eq!(refund_availability(&charge, &[]), RefundAvailability::Unavailable);
    }

    #[test]
    fn failed_refunds_do_not_count() {
        let charge = captured_charge(1000);
        let mut done = Refund::new(charge.id, 300);
        done.status = RefundStatus::Refunded;
        let mut failed = Refund::new(charge.id, 500);
        failed.status = RefundStatus::RefundError;
        let pending = Refund::new(charge.id, 200);

        assert_eq!(
            refund_availability(&charge, &[done, failed, pending]),
            RefundAvailability::Available {
                amount_available: 500
            }
        );
    }

    #[test]
    fn fully_refunded_charge() {
        let charge = captured_charge(1000);
        let mut done = Refund::new(charge.id, 1000);
        done.status = RefundStatus::RefundSubmitted;
        let availability = refund_availability(&charge, &[done]);
        assert_eq!(availability, RefundAvailability::Full);
        assert_eq!(availability.amount_available(), 0);
    }
}
