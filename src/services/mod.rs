//! Charge lifecycle services: the operations that move a charge through its
//! state machine, the notification reconciler and their shared plumbing.

pub mod authorisation_cleanup;
pub mod authorise;
pub mod cancel;
pub mod capture;
pub mod charges;
pub mod executor;
pub mod notification_reconciler;
pub mod notifier;
pub mod pipeline;
pub mod refund;
pub mod source_verifier;

pub use authorisation_cleanup::AuthorisationErrorCleanupService;
pub use authorise::{AuthorisationResult, CardAuthoriseService};
pub use cancel::ChargeCancelService;
pub use capture::CardCaptureService;
pub use charges::{ChargeService, NewCharge};
pub use executor::{ExecutionOutcome, ExecutorConfig, GatewayOperationExecutor};
pub use notification_reconciler::{NotificationOutcome, NotificationReceipt, NotificationReconciler};
pub use notifier::{LoggingStatusChangeNotifier, StatusChangeNotifier};
pub use pipeline::{PreOperation, TransactionPipeline, TransactionalOperation};
pub use refund::{ChargeRefundService, RefundResult};
pub use source_verifier::{DnsResolver, NotificationSourceVerifier, SystemDnsResolver};

use crate::config::{env_or, ConfigError};
use std::time::Duration;

/// Limits and windows shared by the lifecycle services and the sweeps.
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Rejected captures are retried this many times before the charge is
    /// moved to capture error.
    pub max_capture_retries: u32,
    /// Age after which an unfinished pre-capture charge is expired.
    pub charge_expiry_window: Duration,
    /// Age after which a charge awaiting its capture request is expired.
    pub awaiting_capture_expiry_window: Duration,
    /// Age after which charges stuck in an authorisation error are cleaned up.
    pub authorisation_error_cleanup_age: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            max_capture_retries: 3,
            charge_expiry_window: Duration::from_secs(5_400),
            awaiting_capture_expiry_window: Duration::from_secs(432_000),
            authorisation_error_cleanup_age: Duration::from_secs(3_600),
        }
    }
}

impl LifecycleConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            max_capture_retries: env_or("CAPTURE_MAX_RETRIES", defaults.max_capture_retries)?,
            charge_expiry_window: seconds_from_env(
                "CHARGE_EXPIRY_WINDOW_SECONDS",
                defaults.charge_expiry_window,
            )?,
            awaiting_capture_expiry_window: seconds_from_env(
                "AWAITING_CAPTURE_EXPIRY_WINDOW_SECONDS",
                defaults.awaiting_capture_expiry_window,
            )?,
            authorisation_error_cleanup_age: seconds_from_env(
                "AUTH_ERROR_CLEANUP_AGE_SECONDS",
                defaults.authorisation_error_cleanup_age,
            )?,
        })
    }
}

fn seconds_from_env(key: &str, default: Duration) -> Result<Duration, ConfigError> {
    env_or(key, default.as_secs()).map(Duration::from_secs)
}
