use crate::config::{env_or, ConfigError};
use async_trait::async_trait;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// Sweep contract
// ---------------------------------------------------------------------------

/// Per-run count of charges a sweep moved on and charges it could not.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepTally {
    pub success: u32,
    pub failed: u32,
}

impl SweepTally {
    pub fn record(&mut self, succeeded: bool) {
        if succeeded {
            self.success += 1;
        } else {
            self.failed += 1;
        }
    }

    pub fn total(&self) -> u32 {
        self.success + self.failed
    }
}

/// One pass over a batch of eligible charges. Per-charge failures are
/// counted in the tally; an `Err` means the batch could not be loaded.
#[async_trait]
pub trait Sweep: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run_once(&self) -> anyhow::Result<SweepTally>;
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SweepConfig {
    pub enabled: bool,
    pub interval: Duration,
    /// Upper bound of the random delay added to each interval.
    pub jitter: Duration,
    pub batch_size: i64,
}

impl SweepConfig {
    /// Reads `<PREFIX>_ENABLED`, `<PREFIX>_INTERVAL_SECONDS`,
    /// `<PREFIX>_JITTER_SECONDS` and `<PREFIX>_BATCH_SIZE`.
    pub fn from_env(prefix: &str, defaults: SweepConfig) -> Result<Self, ConfigError> {
        let key = |suffix: &str| format!("{}_{}", prefix, suffix);
        Ok(Self {
            enabled: env_or(&key("ENABLED"), defaults.enabled)?,
            interval: Duration::from_secs(env_or(
                &key("INTERVAL_SECONDS"),
                defaults.interval.as_secs(),
            )?),
            jitter: Duration::from_secs(env_or(&key("JITTER_SECONDS"), defaults.jitter.as_secs())?),
            batch_size: env_or(&key("BATCH_SIZE"), defaults.batch_size)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct SweepsConfig {
    pub capture: SweepConfig,
    pub expiry: SweepConfig,
    pub authorisation_cleanup: SweepConfig,
}

impl Default for SweepsConfig {
    fn default() -> Self {
        Self {
            capture: SweepConfig {
                enabled: true,
                interval: Duration::from_secs(60),
                jitter: Duration::from_secs(10),
                batch_size: 100,
            },
            expiry: SweepConfig {
                enabled: true,
                interval: Duration::from_secs(300),
                jitter: Duration::from_secs(30),
                batch_size: 500,
            },
            authorisation_cleanup: SweepConfig {
                enabled: true,
                interval: Duration::from_secs(600),
                jitter: Duration::from_secs(60),
                batch_size: 100,
            },
        }
    }
}

impl SweepsConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            capture: SweepConfig::from_env("CAPTURE_SWEEP", defaults.capture)?,
            expiry: SweepConfig::from_env("EXPIRY_SWEEP", defaults.expiry)?,
            authorisation_cleanup: SweepConfig::from_env(
                "AUTH_CLEANUP_SWEEP",
                defaults.authorisation_cleanup,
            )?,
        })
    }

    pub fn iter(&self) -> [(&'static str, &SweepConfig); 3] {
        [
            ("capture_sweep", &self.capture),
            ("expiry_sweep", &self.expiry),
            ("authorisation_cleanup_sweep", &self.authorisation_cleanup),
        ]
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

/// Runs one sweep repeatedly. The next run is only scheduled once the
/// previous one has finished, so runs of the same sweep never overlap.
pub struct SweepWorker {
    sweep: Arc<dyn Sweep>,
    config: SweepConfig,
}

impl SweepWorker {
    pub fn new(sweep: Arc<dyn Sweep>, config: SweepConfig) -> Self {
        Self { sweep, config }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        let name = self.sweep.name();
        info!(
            sweep = name,
            interval_secs = self.config.interval.as_secs(),
            jitter_secs = self.config.jitter.as_secs(),
            batch_size = self.config.batch_size,
            "sweep worker started"
        );

        loop {
            let delay = self.next_delay();
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!(sweep = name, "sweep worker stopping");
                        break;
                    }
                }
                _ = tokio::time::sleep(delay) => {
                    self.run_cycle().await;
                }
            }
        }

        info!(sweep = name, "sweep worker stopped");
    }

    /// One run, logged. Returns `None` when the run failed as a whole.
    pub async fn run_cycle(&self) -> Option<SweepTally> {
        let name = self.sweep.name();
        match self.sweep.run_once().await {
            Ok(tally) => {
                if tally.total() > 0 {
                    info!(sweep = name, success = tally.success, failed = tally.failed, "sweep run finished");
                }
                Some(tally)
            }
            Err(e) => {
                warn!(sweep = name, error = %e, "sweep run failed");
                None
            }
        }
    }

    fn next_delay(&self) -> Duration {
        let jitter_ms = self.config.jitter.as_millis() as u64;
        let extra = if jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_ms)
        };
        self.config.interval + Duration::from_millis(extra)
    }
}
