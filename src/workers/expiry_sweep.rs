use crate::charges::{Charge, ChargeStatus, StatusFlow};
use crate::database::{ChargeStore, SweepQuery};
use crate::services::{ChargeCancelService, LifecycleConfig};
use crate::workers::sweep::{Sweep, SweepTally};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::warn;

/// Expires charges that were abandoned before capture.
pub struct ExpirySweep {
    store: Arc<dyn ChargeStore>,
    cancels: Arc<ChargeCancelService>,
    lifecycle: LifecycleConfig,
    batch_size: i64,
}

impl ExpirySweep {
    pub fn new(
        store: Arc<dyn ChargeStore>,
        cancels: Arc<ChargeCancelService>,
        lifecycle: LifecycleConfig,
        batch_size: i64,
    ) -> Self {
        Self {
            store,
            cancels,
            lifecycle,
            batch_size,
        }
    }

    async fn eligible(&self) -> anyhow::Result<Vec<Charge>> {
        let now = Utc::now();
        let pre_capture: Vec<ChargeStatus> = StatusFlow::EXPIRE
            .sources
            .iter()
            .copied()
            .filter(|s| *s != ChargeStatus::AwaitingCaptureRequest)
            .collect();

        let mut charges = self
            .store
            .find_eligible_for_sweep(&SweepQuery {
                statuses: pre_capture,
                created_before: now - chrono::Duration::from_std(self.lifecycle.charge_expiry_window)?,
                limit: self.batch_size,
            })
            .await?;

        let remaining = self.batch_size - charges.len() as i64;
        if remaining > 0 {
            charges.extend(
                self.store
                    .find_eligible_for_sweep(&SweepQuery {
                        statuses: vec![ChargeStatus::AwaitingCaptureRequest],
                        created_before: now
                            - chrono::Duration::from_std(self.lifecycle.awaiting_capture_expiry_window)?,
                        limit: remaining,
                    })
                    .await?,
            );
        }
        Ok(charges)
    }
}

#[async_trait]
impl Sweep for ExpirySweep {
    fn name(&self) -> &'static str {
        "expiry_sweep"
    }

    async fn run_once(&self) -> anyhow::Result<SweepTally> {
        let mut tally = SweepTally::default();
        for charge in self.eligible().await? {
            let external_id = charge.external_id.clone();
            match self.cancels.cancel_charge(charge, StatusFlow::EXPIRE).await {
                Ok(expired) => tally.record(matches!(
                    expired.status,
                    ChargeStatus::Expired | ChargeStatus::ExpireCancelSubmitted
                )),
                Err(e) => {
                    warn!(charge_external_id = %external_id, error = %e, "expiry failed");
                    tally.record(false);
                }
            }
        }
        Ok(tally)
    }
}
