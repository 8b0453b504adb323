//! Error taxonomy for charge lifecycle operations
//!
//! Every lifecycle service, the notification reconciler and the sweeps speak
//! `ChargeError`. Each variant carries its HTTP status, a machine-readable
//! code and a retryability flag so the HTTP layer and the sweeps can act on
//! it without matching on messages.

use crate::charges::ChargeStatus;
use crate::database::error::DatabaseError;
use crate::payments::error::GatewayError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type ChargeResult<T> = Result<T, ChargeError>;

/// Machine-readable error codes returned to API clients
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    #[serde(rename = "ILLEGAL_STATE")]
    IllegalState,
    #[serde(rename = "OPERATION_ALREADY_IN_PROGRESS")]
    OperationAlreadyInProgress,
    #[serde(rename = "NOT_FOUND")]
    NotFound,
    #[serde(rename = "CHARGE_EXPIRED")]
    Expired,
    #[serde(rename = "CONFLICT")]
    Conflict,
    #[serde(rename = "GATEWAY_ERROR")]
    GatewayError,
    #[serde(rename = "REFUND_NOT_AVAILABLE")]
    RefundNotAvailable,
    #[serde(rename = "VALIDATION_ERROR")]
    ValidationError,
    #[serde(rename = "DATABASE_ERROR")]
    DatabaseError,
    #[serde(rename = "INTERNAL_ERROR")]
    InternalError,
}

#[derive(Debug, Clone, Error)]
pub enum ChargeError {
    #[error("charge {charge_external_id} cannot {operation} from status {status}")]
    IllegalState {
        charge_external_id: String,
        operation: &'static str,
        status: ChargeStatus,
    },

    #[error("{operation} already in progress for charge {charge_external_id}")]
    OperationAlreadyInProgress {
        charge_external_id: String,
        operation: &'static str,
    },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("charge {charge_external_id} has expired")]
    Expired { charge_external_id: String },

    #[error("{entity} {id} was modified concurrently")]
    Conflict { entity: &'static str, id: String },

    #[error("gateway fault: {0}")]
    GatewayFault(#[from] GatewayError),

    #[error("refund not available for charge {charge_external_id}: {reason}")]
    RefundNotAvailable {
        charge_external_id: String,
        reason: String,
    },

    #[error("validation error: {message}")]
    Validation { message: String },

    #[error("storage error: {message}")]
    Storage { message: String },

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl ChargeError {
    pub fn charge_not_found(external_id: &str) -> Self {
        ChargeError::NotFound {
            entity: "charge",
            id: external_id.to_string(),
        }
    }

    pub fn error_code(&self) -> ErrorCode {
        match self {
            ChargeError::IllegalState { .. } => ErrorCode::IllegalState,
            ChargeError::OperationAlreadyInProgress { .. } => ErrorCode::OperationAlreadyInProgress,
            ChargeError::NotFound { .. } => ErrorCode::NotFound,
            ChargeError::Expired { .. } => ErrorCode::Expired,
            ChargeError::Conflict { .. } => ErrorCode::Conflict,
            ChargeError::GatewayFault(_) => ErrorCode::GatewayError,
            ChargeError::RefundNotAvailable { .. } => ErrorCode::RefundNotAvailable,
            ChargeError::Validation { .. } => ErrorCode::ValidationError,
            ChargeError::Storage { .. } => ErrorCode::DatabaseError,
            ChargeError::Internal { .. } => ErrorCode::InternalError,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            ChargeError::OperationAlreadyInProgress { .. } => true,
            ChargeError::Conflict { .. } => true,
            ChargeError::GatewayFault(e) => e.is_retryable(),
            ChargeError::Storage { .. } => true,
            ChargeError::IllegalState { .. }
            | ChargeError::NotFound { .. }
            | ChargeError::Expired { .. }
            | ChargeError::RefundNotAvailable { .. }
            | ChargeError::Validation { .. }
            | ChargeError::Internal { .. } => false,
        }
    }

    pub fn http_status_code(&self) -> u16 {
        match self {
            ChargeError::IllegalState { .. } => 400,
            ChargeError::OperationAlreadyInProgress { .. } => 202,
            ChargeError::NotFound { .. } => 404,
            ChargeError::Expired { .. } => 400,
            ChargeError::Conflict { .. } => 409,
            ChargeError::GatewayFault(_) => 502,
            ChargeError::RefundNotAvailable { .. } => 412,
            ChargeError::Validation { .. } => 400,
            ChargeError::Storage { .. } => 503,
            ChargeError::Internal { .. } => 500,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            ChargeError::IllegalState { operation, status, .. } => {
                format!("Charge is in status {} and cannot {}", status, operation)
            }
            ChargeError::OperationAlreadyInProgress { operation, .. } => {
                format!("A {} request for this charge is already being processed", operation)
            }
            ChargeError::NotFound { entity, .. } => format!("The {} was not found", entity),
            ChargeError::Expired { .. } => "The charge has expired".to_string(),
            ChargeError::Conflict { .. } => {
                "The charge was updated by another request. Please retry".to_string()
            }
            ChargeError::GatewayFault(_) => "The payment gateway returned an error".to_string(),
            ChargeError::RefundNotAvailable { reason, .. } => reason.clone(),
            ChargeError::Validation { message } => message.clone(),
            ChargeError::Storage { .. } | ChargeError::Internal { .. } => {
                "An internal error occurred. Please try again later".to_string()
            }
        }
    }
}

impl From<DatabaseError> for ChargeError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::Conflict { entity, id } => ChargeError::Conflict { entity, id },
            DatabaseError::NotFound { entity, id } => ChargeError::NotFound { entity, id },
            other => ChargeError::Storage {
                message: other.to_string(),
            },
        }
    }
}
