use crate::charges::{Charge, ChargeStatus};
use crate::database::{ChargeStore, StatusChange};
use crate::error::{ChargeError, ChargeResult};
use crate::services::pipeline::load_charge;
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
pub struct NewCharge {
    pub gateway_account_id: i64,
    pub amount: i64,
    pub reference: String,
    pub description: String,
    #[serde(default)]
    pub delayed_capture: bool,
}

/// Creating charges and the first step of the payment page.
pub struct ChargeService {
    store: Arc<dyn ChargeStore>,
}

impl ChargeService {
    pub fn new(store: Arc<dyn ChargeStore>) -> Self {
        Self { store }
    }

    pub async fn create(&self, request: NewCharge) -> ChargeResult<Charge> {
        if request.amount <= 0 {
            return Err(ChargeError::Validation {
                message: "amount must be positive".to_string(),
            });
        }
        if request.reference.trim().is_empty() {
            return Err(ChargeError::Validation {
                message: "reference is required".to_string(),
            });
        }
        if self
            .store
            .find_gateway_account(request.gateway_account_id)
            .await?
            .is_none()
        {
            return Err(ChargeError::NotFound {
                entity: "gateway_account",
                id: request.gateway_account_id.to_string(),
            });
        }

        let charge = self
            .store
            .insert_charge(
                Charge::new(
                    request.gateway_account_id,
                    request.amount,
                    &request.reference,
                    &request.description,
                )
                .with_delayed_capture(request.delayed_capture),
            )
            .await?;

        info!(
            charge_external_id = %charge.external_id,
            gateway_account_id = charge.gateway_account_id,
            amount = charge.amount,
            "charge created"
        );
        Ok(charge)
    }

    pub async fn get(&self, charge_external_id: &str) -> ChargeResult<Charge> {
        load_charge(self.store.as_ref(), charge_external_id).await
    }

    /// The payer opened the payment page. Repeating it is harmless.
    pub async fn start_card_entry(&self, charge_external_id: &str) -> ChargeResult<Charge> {
        let charge = load_charge(self.store.as_ref(), charge_external_id).await?;
        match charge.status {
            ChargeStatus::EnteringCardDetails => Ok(charge),
            ChargeStatus::Created => {
                let updated = self
                    .store
                    .commit_status_change(&charge, StatusChange::to(ChargeStatus::EnteringCardDetails))
                    .await?;
                info!(
                    charge_external_id = %updated.external_id,
                    from_status = %charge.status,
                    to_status = %updated.status,
                    "charge status committed"
                );
                Ok(updated)
            }
            ChargeStatus::Expired => Err(ChargeError::Expired {
                charge_external_id: charge.external_id,
            }),
            status => Err(ChargeError::IllegalState {
                charge_external_id: charge.external_id,
                operation: "start_card_entry",
                status,
            }),
        }
    }
}
