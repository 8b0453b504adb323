use crate::charges::ChargeStatus;
use crate::database::{ChargeStore, SweepQuery};
use crate::services::CardCaptureService;
use crate::workers::sweep::{Sweep, SweepTally};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

/// Submits approved captures to the gateway.
pub struct CaptureSweep {
    store: Arc<dyn ChargeStore>,
    captures: Arc<CardCaptureService>,
    batch_size: i64,
}

impl CaptureSweep {
    pub fn new(store: Arc<dyn ChargeStore>, captures: Arc<CardCaptureService>, batch_size: i64) -> Self {
        Self {
            store,
            captures,
            batch_size,
        }
    }
}

#[async_trait]
impl Sweep for CaptureSweep {
    fn name(&self) -> &'static str {
        "capture_sweep"
    }

    async fn run_once(&self) -> anyhow::Result<SweepTally> {
        let charges = self
            .store
            .find_eligible_for_sweep(&SweepQuery {
                statuses: ChargeStatus::CAPTURABLE.to_vec(),
                created_before: Utc::now(),
                limit: self.batch_size,
            })
            .await?;

        let mut tally = SweepTally::default();
        for charge in charges {
            let external_id = charge.external_id.clone();
            match self.captures.capture_charge(charge).await {
                Ok(captured) => {
                    let submitted = captured.status == ChargeStatus::CaptureSubmitted;
                    if !submitted {
                        info!(charge_external_id = %external_id, status = %captured.status, "capture not submitted");
                    }
                    tally.record(submitted);
                }
                Err(e) => {
                    warn!(charge_external_id = %external_id, error = %e, "capture failed");
                    tally.record(false);
                }
            }
        }
        Ok(tally)
    }
}
