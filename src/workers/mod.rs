//! Background sweeps over charges that need moving on without a caller.

pub mod authorisation_cleanup_sweep;
pub mod capture_sweep;
pub mod expiry_sweep;
pub mod sweep;

pub use authorisation_cleanup_sweep::AuthorisationErrorCleanupSweep;
pub use capture_sweep::CaptureSweep;
pub use expiry_sweep::ExpirySweep;
pub use sweep::{Sweep, SweepConfig, SweepTally, SweepWorker, SweepsConfig};
