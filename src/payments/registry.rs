use crate::charges::ChargeStatus;
use crate::payments::error::{GatewayError, GatewayResponse};
use crate::payments::gateway::PaymentGateway;
use crate::payments::gateways::{SandboxGateway, SmartpayGateway};
use crate::payments::status_mapper::InterpretedStatus;
use crate::payments::types::GatewayName;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct GatewayRegistryConfig {
    pub enabled_gateways: Vec<GatewayName>,
}

impl Default for GatewayRegistryConfig {
    fn default() -> Self {
        Self {
            enabled_gateways: vec![GatewayName::Sandbox],
        }
    }
}

impl GatewayRegistryConfig {
    pub fn from_env() -> GatewayResponse<Self> {
        let enabled_raw =
            std::env::var("ENABLED_PAYMENT_GATEWAYS").unwrap_or_else(|_| "sandbox".to_string());
        let mut enabled_gateways = Vec::new();
        for part in enabled_raw.split(',') {
            let value = part.trim();
            if value.is_empty() {
                continue;
            }
            let name = GatewayName::from_str(value)?;
            if !enabled_gateways.contains(&name) {
                enabled_gateways.push(name);
            }
        }

        if enabled_gateways.is_empty() {
            return Err(GatewayError::Validation {
                message: "at least one payment gateway must be enabled".to_string(),
                field: Some("ENABLED_PAYMENT_GATEWAYS".to_string()),
            });
        }

        Ok(Self { enabled_gateways })
    }
}

/// Name-keyed set of gateway integrations, built once at startup and shared
/// by the lifecycle services and the notification reconciler.
#[derive(Default, Clone)]
pub struct GatewayRegistry {
    gateways: HashMap<GatewayName, Arc<dyn PaymentGateway>>,
}

impl GatewayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_env() -> GatewayResponse<Self> {
        Self::from_config(&GatewayRegistryConfig::from_env()?)
    }

    pub fn from_config(config: &GatewayRegistryConfig) -> GatewayResponse<Self> {
        let mut registry = Self::new();
        for name in &config.enabled_gateways {
            let gateway: Arc<dyn PaymentGateway> = match name {
                GatewayName::Sandbox => Arc::new(SandboxGateway::from_env()),
                GatewayName::Smartpay => Arc::new(SmartpayGateway::from_env()?),
            };
            registry.register(gateway);
        }
        Ok(registry)
    }

    pub fn with_gateway(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.register(gateway);
        self
    }

    pub fn register(&mut self, gateway: Arc<dyn PaymentGateway>) {
        self.gateways.insert(gateway.name(), gateway);
    }

    pub fn get(&self, name: GatewayName) -> GatewayResponse<Arc<dyn PaymentGateway>> {
        self.gateways
            .get(&name)
            .cloned()
            .ok_or(GatewayError::Validation {
                message: format!("gateway {} is not enabled", name),
                field: Some("gateway".to_string()),
            })
    }

    /// Looks a gateway up by the name used in notification URLs.
    pub fn resolve(&self, name: &str) -> Option<Arc<dyn PaymentGateway>> {
        GatewayName::from_str(name)
            .ok()
            .and_then(|name| self.gateways.get(&name).cloned())
    }

    pub fn interpret(
        &self,
        gateway_name: &str,
        raw_status: &str,
        current: ChargeStatus,
    ) -> InterpretedStatus {
        match self.resolve(gateway_name) {
            Some(gateway) => gateway.status_mapper().interpret(raw_status, current),
            None => InterpretedStatus::Unknown,
        }
    }

    pub fn list_available(&self) -> Vec<GatewayName> {
        let mut names: Vec<GatewayName> = self.gateways.keys().copied().collect();
        names.sort_by_key(|n| n.as_str());
        names
    }
}
