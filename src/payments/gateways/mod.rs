pub mod sandbox;
pub mod smartpay;

pub use sandbox::{SandboxConfig, SandboxGateway};
pub use smartpay::{SmartpayConfig, SmartpayGateway};
