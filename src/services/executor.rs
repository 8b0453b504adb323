//! Bounded gateway executor
//!
//! Authorisation calls run on the tokio runtime behind a semaphore sized from
//! the host's parallelism. The caller waits at most `timeout`; a timed-out
//! task is not cancelled and still performs its post-operation write.

use crate::config::{env_or, ConfigError};
use crate::error::{ChargeError, ChargeResult};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{error, warn};

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Permits per available CPU.
    pub pool_multiplier: usize,
    /// How long a caller waits for the operation before giving up on it.
    pub timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            pool_multiplier: 10,
            timeout: Duration::from_millis(10_000),
        }
    }
}

impl ExecutorConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            pool_multiplier: env_or("GATEWAY_EXECUTOR_POOL_MULTIPLIER", defaults.pool_multiplier)?,
            timeout: Duration::from_millis(env_or(
                "GATEWAY_EXECUTOR_TIMEOUT_MS",
                defaults.timeout.as_millis() as u64,
            )?),
        })
    }
}

#[derive(Debug)]
pub enum ExecutionOutcome<T> {
    Completed(T),
    Failed(ChargeError),
    TimedOut,
}

impl<T> ExecutionOutcome<T> {
    /// Folds the outcome into a result. A timeout means the work is still
    /// running, which the caller sees as the operation being in progress.
    pub fn into_result(self, charge_external_id: &str, operation: &'static str) -> ChargeResult<T> {
        match self {
            ExecutionOutcome::Completed(value) => Ok(value),
            ExecutionOutcome::Failed(e) => Err(e),
            ExecutionOutcome::TimedOut => Err(ChargeError::OperationAlreadyInProgress {
                charge_external_id: charge_external_id.to_string(),
                operation,
            }),
        }
    }
}

pub struct GatewayOperationExecutor {
    permits: Arc<Semaphore>,
    size: usize,
    timeout: Duration,
}

impl GatewayOperationExecutor {
    pub fn new(config: &ExecutorConfig) -> Self {
        let parallelism = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self::with_permits(config.pool_multiplier.max(1) * parallelism, config.timeout)
    }

    pub fn with_permits(size: usize, timeout: Duration) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
            timeout,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    pub async fn execute<F, T>(&self, work: F) -> ExecutionOutcome<T>
    where
        F: Future<Output = ChargeResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let permits = self.permits.clone();
        let handle = tokio::spawn(async move {
            let _permit = permits
                .acquire_owned()
                .await
                .map_err(|e| ChargeError::Internal {
                    message: format!("gateway executor closed: {}", e),
                })?;
            work.await
        });

        match tokio::time::timeout(self.timeout, handle).await {
            Ok(Ok(Ok(value))) => ExecutionOutcome::Completed(value),
            Ok(Ok(Err(e))) => ExecutionOutcome::Failed(e),
            Ok(Err(join_error)) => {
                error!(error = %join_error, "gateway operation task failed");
                ExecutionOutcome::Failed(ChargeError::Internal {
                    message: format!("gateway operation task failed: {}", join_error),
                })
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.timeout.as_millis() as u64,
                    "gateway operation still running after timeout"
                );
                ExecutionOutcome::TimedOut
            }
        }
    }
}
