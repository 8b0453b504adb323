//! Card payment connector: drives charges and refunds through their status
//! state machine against pluggable payment gateways.

pub mod api;
pub mod charges;
pub mod config;
pub mod database;
pub mod error;
pub mod health;
pub mod logging;
pub mod middleware;
pub mod payments;
pub mod services;
pub mod workers;
