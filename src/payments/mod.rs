pub mod error;
pub mod gateway;
pub mod gateways;
pub mod registry;
pub mod status_mapper;
pub mod types;
pub mod utils;

pub use error::{GatewayError, GatewayResponse};
pub use gateway::PaymentGateway;
pub use registry::{GatewayRegistry, GatewayRegistryConfig};
pub use status_mapper::{InterpretedStatus, StatusMapper};
pub use types::GatewayName;
