use crate::charges::{Charge, ChargeEvent, GatewayAccount, Refund};
use crate::database::charge_store::{
    ChargeStore, RefundStatusChange, StatusChange, StoreResult, SweepQuery,
};
use crate::database::error::DatabaseError;
use crate::payments::types::GatewayName;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct State {
    charges: HashMap<Uuid, Charge>,
    events: Vec<ChargeEvent>,
    refunds: HashMap<Uuid, Refund>,
    accounts: HashMap<i64, GatewayAccount>,
}

/// `ChargeStore` kept in process memory. Used when no database is configured
/// and throughout the tests.
#[derive(Default)]
pub struct InMemoryChargeStore {
    state: RwLock<State>,
}

impl InMemoryChargeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_gateway_account(&self, account: GatewayAccount) {
        self.state
            .write()
            .await
            .accounts
            .insert(account.id, account);
    }
}

#[async_trait]
impl ChargeStore for InMemoryChargeStore {
    async fn insert_charge(&self, charge: Charge) -> StoreResult<Charge> {
        let mut state = self.state.write().await;
        if state
            .charges
            .values()
            .any(|c| c.external_id == charge.external_id)
        {
            return Err(DatabaseError::Query {
                message: format!("duplicate charge external id {}", charge.external_id),
            });
        }
        state.events.push(ChargeEvent {
            charge_id: charge.id,
            status: charge.status,
            gateway_event_date: None,
            recorded_at: charge.created_at,
        });
        state.charges.insert(charge.id, charge.clone());
        Ok(charge)
    }

    async fn find_by_external_id(&self, external_id: &str) -> StoreResult<Option<Charge>> {
        let state = self.state.read().await;
        Ok(state
            .charges
            .values()
            .find(|c| c.external_id == external_id)
            .cloned())
    }

    async fn find_by_gateway_transaction_id(
        &self,
        gateway: GatewayName,
        transaction_id: &str,
    ) -> StoreResult<Option<Charge>> {
        let state = self.state.read().await;
        Ok(state
            .charges
            .values()
            .find(|c| {
                c.gateway_transaction_id.as_deref() == Some(transaction_id)
                    && state
                        .accounts
                        .get(&c.gateway_account_id)
                        .map(|a| a.gateway == gateway)
                        .unwrap_or(false)
            })
            .cloned())
    }

    async fn reload(&self, charge_id: Uuid) -> StoreResult<Charge> {
        let state = self.state.read().await;
        state
            .charges
            .get(&charge_id)
            .cloned()
            .ok_or(DatabaseError::NotFound {
                entity: "charge",
                id: charge_id.to_string(),
            })
    }

    async fn commit_status_change(
        &self,
        charge: &Charge,
        change: StatusChange,
    ) -> StoreResult<Charge> {
        let mut state = self.state.write().await;
        let stored = state
            .charges
            .get_mut(&charge.id)
            .ok_or(DatabaseError::NotFound {
                entity: "charge",
                id: charge.external_id.clone(),
            })?;
        if stored.version != charge.version {
            return Err(DatabaseError::Conflict {
                entity: "charge",
                id: charge.external_id.clone(),
            });
        }

        let now = Utc::now();
        stored.status = change.to;
        stored.version += 1;
        stored.updated_at = now;
        if let Some(transaction_id) = change.gateway_transaction_id {
            stored.gateway_transaction_id = Some(transaction_id);
        }
        let updated = stored.clone();

        state.events.push(ChargeEvent {
            charge_id: charge.id,
            status: change.to,
            gateway_event_date: change.gateway_event_date,
            recorded_at: now,
        });
        Ok(updated)
    }

    async fn find_events(&self, charge_id: Uuid) -> StoreResult<Vec<ChargeEvent>> {
        let state = self.state.read().await;
        Ok(state
            .events
            .iter()
            .filter(|e| e.charge_id == charge_id)
            .cloned()
            .collect())
    }

    async fn find_eligible_for_sweep(&self, query: &SweepQuery) -> StoreResult<Vec<Charge>> {
        let state = self.state.read().await;
        let mut eligible: Vec<Charge> = state
            .charges
            .values()
            .filter(|c| query.statuses.contains(&c.status) && c.created_at < query.created_before)
            .cloned()
            .collect();
        eligible.sort_by_key(|c| c.created_at);
        eligible.truncate(query.limit.max(0) as usize);
        Ok(eligible)
    }

    async fn find_gateway_account(&self, account_id: i64) -> StoreResult<Option<GatewayAccount>> {
        Ok(self.state.read().await.accounts.get(&account_id).cloned())
    }

    async fn insert_refund(&self, charge: &Charge, refund: Refund) -> StoreResult<Refund> {
        let mut state = self.state.write().await;
        let stored = state
            .charges
            .get_mut(&charge.id)
            .ok_or(DatabaseError::NotFound {
                entity: "charge",
                id: charge.external_id.clone(),
            })?;
        if stored.version != charge.version {
            return Err(DatabaseError::Conflict {
                entity: "charge",
                id: charge.external_id.clone(),
            });
        }
        stored.version += 1;
        stored.updated_at = Utc::now();

        state.refunds.insert(refund.id, refund.clone());
        Ok(refund)
    }

    async fn find_refunds_for_charge(&self, charge_id: Uuid) -> StoreResult<Vec<Refund>> {
        let state = self.state.read().await;
        let mut refunds: Vec<Refund> = state
            .refunds
            .values()
            .filter(|r| r.charge_id == charge_id)
            .cloned()
            .collect();
        refunds.sort_by_key(|r| r.created_at);
        Ok(refunds)
    }

    async fn commit_refund_status_change(
        &self,
        refund: &Refund,
        change: RefundStatusChange,
    ) -> StoreResult<Refund> {
        let mut state = self.state.write().await;
        let stored = state
            .refunds
            .get_mut(&refund.id)
            .ok_or(DatabaseError::NotFound {
                entity: "refund",
                id: refund.external_id.clone(),
            })?;
        if stored.version != refund.version {
            return Err(DatabaseError::Conflict {
                entity: "refund",
                id: refund.external_id.clone(),
            });
        }

        stored.status = change.to;
        stored.version += 1;
        stored.updated_at = Utc::now();
        if let Some(reference) = change.gateway_reference {
            stored.gateway_reference = Some(reference);
        }
        Ok(stored.clone())
    }
}
