pub mod model;
pub mod status;
pub mod status_flow;

pub use model::{refund_availability, Charge, ChargeEvent, GatewayAccount, Refund, RefundAvailability};
pub use status::{is_legal_transition, ChargeStatus, RefundStatus, StatusCategory};
pub use status_flow::StatusFlow;
