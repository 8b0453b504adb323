use thiserror::Error;

pub type GatewayResponse<T> = Result<T, GatewayError>;

/// Faults raised while talking to a gateway. Declines are not faults: they
/// travel as outcome values in `payments::types`.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum GatewayError {
    #[error("Validation error: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("Network error: {message}")]
    Network { message: String },

    #[error("Gateway timed out: {message}")]
    Timeout { message: String },

    #[error("Rate limit exceeded: {message}")]
    RateLimited {
        message: String,
        retry_after_seconds: Option<u64>,
    },

    #[error("Gateway error: gateway={gateway}, message={message}")]
    Provider {
        gateway: String,
        message: String,
        code: Option<String>,
        retryable: bool,
    },

    #[error("Notification could not be parsed: {message}")]
    NotificationParse { message: String },

    #[error("Operation {operation} is not supported by {gateway}")]
    Unsupported {
        gateway: String,
        operation: &'static str,
    },
}

impl GatewayError {
    pub fn provider(gateway: &str, message: impl Into<String>) -> Self {
        GatewayError::Provider {
            gateway: gateway.to_string(),
            message: message.into(),
            code: None,
            retryable: false,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::Validation { .. } => false,
            GatewayError::Network { .. } => true,
            GatewayError::Timeout { .. } => true,
            GatewayError::RateLimited { .. } => true,
            GatewayError::Provider { retryable, .. } => *retryable,
            GatewayError::NotificationParse { .. } => false,
            GatewayError::Unsupported { .. } => false,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, GatewayError::Timeout { .. })
    }

    pub fn http_status_code(&self) -> u16 {
        match self {
            GatewayError::Validation { .. } => 400,
            GatewayError::NotificationParse { .. } => 400,
            GatewayError::Network { .. } => 503,
            GatewayError::Timeout { .. } => 504,
            GatewayError::RateLimited { .. } => 429,
            GatewayError::Provider { .. } => 502,
            GatewayError::Unsupported { .. } => 501,
        }
    }
}
