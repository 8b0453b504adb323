//! Health check module
//! Reports on the charge store, the gateway executor and the enabled gateways

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{error, warn};

use crate::database::ChargeStore;
use crate::payments::GatewayRegistry;
use crate::services::GatewayOperationExecutor;

/// Health status response
#[derive(Debug, Serialize, Clone)]
pub struct HealthStatus {
    pub status: HealthState,
    pub checks: HashMap<String, ComponentHealth>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Overall health state
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Individual component health status
#[derive(Debug, Serialize, Clone)]
pub struct ComponentHealth {
    pub status: ComponentState,
    pub response_time_ms: Option<u128>,
    pub details: Option<String>,
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub enum ComponentState {
    Up,
    Down,
    Warning,
}

impl HealthStatus {
    pub fn new() -> Self {
        Self {
            status: HealthState::Healthy,
            checks: HashMap::new(),
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self.status, HealthState::Healthy)
    }

    fn record(&mut self, component: &str, health: ComponentHealth) {
        let worst = match (&self.status, &health.status) {
            (_, ComponentState::Down) | (HealthState::Unhealthy, _) => HealthState::Unhealthy,
            (_, ComponentState::Warning) | (HealthState::Degraded, _) => HealthState::Degraded,
            _ => HealthState::Healthy,
        };
        self.status = worst;
        self.checks.insert(component.to_string(), health);
    }
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl ComponentHealth {
    pub fn up(response_time_ms: Option<u128>) -> Self {
        Self {
            status: ComponentState::Up,
            response_time_ms,
            details: None,
        }
    }

    pub fn down(details: Option<String>) -> Self {
        Self {
            status: ComponentState::Down,
            response_time_ms: None,
            details,
        }
    }

    pub fn warning(response_time_ms: Option<u128>, details: Option<String>) -> Self {
        Self {
            status: ComponentState::Warning,
            response_time_ms,
            details,
        }
    }
}

#[derive(Clone)]
pub struct HealthChecker {
    store: Arc<dyn ChargeStore>,
    executor: Arc<GatewayOperationExecutor>,
    registry: Arc<GatewayRegistry>,
}

impl HealthChecker {
    pub fn new(
        store: Arc<dyn ChargeStore>,
        executor: Arc<GatewayOperationExecutor>,
        registry: Arc<GatewayRegistry>,
    ) -> Self {
        Self {
            store,
            executor,
            registry,
        }
    }

    pub async fn check_health(&self) -> HealthStatus {
        let mut health_status = HealthStatus::new();

        let start = Instant::now();
        match timeout(Duration::from_secs(5), self.store.ping()).await {
            Ok(Ok(())) => {
                health_status.record("store", ComponentHealth::up(Some(start.elapsed().as_millis())));
            }
            Ok(Err(e)) => {
                error!("Charge store health check failed: {}", e);
                health_status.record("store", ComponentHealth::down(Some(e.to_string())));
            }
            Err(_) => {
                error!("Charge store health check timed out");
                health_status.record("store", ComponentHealth::down(Some("Timeout".to_string())));
            }
        }

        // A saturated executor still serves requests, they just queue.
        let available = self.executor.available_permits();
        let details = Some(format!("{}/{} permits free", available, self.executor.size()));
        if available == 0 {
            warn!("Gateway executor has no free permits");
            health_status.record("gateway_executor", ComponentHealth::warning(None, details));
        } else {
            health_status.record(
                "gateway_executor",
                ComponentHealth {
                    details,
                    ..ComponentHealth::up(None)
                },
            );
        }

        let gateways = self.registry.list_available();
        if gateways.is_empty() {
            health_status.record(
                "gateways",
                ComponentHealth::down(Some("no gateways enabled".to_string())),
            );
        } else {
            let names: Vec<&str> = gateways.iter().map(|g| g.as_str()).collect();
            health_status.record(
                "gateways",
                ComponentHealth {
                    details: Some(names.join(",")),
                    ..ComponentHealth::up(None)
                },
            );
        }

        health_status
    }
}
