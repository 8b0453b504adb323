use crate::charges::ChargeStatus;
use crate::database::{ChargeStore, SweepQuery};
use crate::services::AuthorisationErrorCleanupService;
use crate::workers::sweep::{Sweep, SweepTally};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Cancels gateway-side leftovers of authorisations that ended in an error.
pub struct AuthorisationErrorCleanupSweep {
    store: Arc<dyn ChargeStore>,
    cleanup: Arc<AuthorisationErrorCleanupService>,
    min_age: Duration,
    batch_size: i64,
}

impl AuthorisationErrorCleanupSweep {
    pub fn new(
        store: Arc<dyn ChargeStore>,
        cleanup: Arc<AuthorisationErrorCleanupService>,
        min_age: Duration,
        batch_size: i64,
    ) -> Self {
        Self {
            store,
            cleanup,
            min_age,
            batch_size,
        }
    }
}

#[async_trait]
impl Sweep for AuthorisationErrorCleanupSweep {
    fn name(&self) -> &'static str {
        "authorisation_cleanup_sweep"
    }

    async fn run_once(&self) -> anyhow::Result<SweepTally> {
        let charges = self
            .store
            .find_eligible_for_sweep(&SweepQuery {
                statuses: ChargeStatus::AUTHORISATION_ERROR_STATUSES.to_vec(),
                created_before: Utc::now() - chrono::Duration::from_std(self.min_age)?,
                limit: self.batch_size,
            })
            .await?;

        let mut tally = SweepTally::default();
        for charge in charges {
            let external_id = charge.external_id.clone();
            match self.cleanup.cleanup(charge).await {
                Ok(_) => tally.record(true),
                Err(e) => {
                    warn!(charge_external_id = %external_id, error = %e, "authorisation error cleanup failed");
                    tally.record(false);
                }
            }
        }
        Ok(tally)
    }
}
