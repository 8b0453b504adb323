//! Charge and refund status model.
//!
//! Every status a charge can hold, the legal edges between them, and the
//! named groups the lifecycle services and the notification reconciler use
//! to decide what they may touch.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unrecognised {kind} status: {value}")]
pub struct StatusParseError {
    pub kind: &'static str,
    pub value: String,
}

/// Which of the four lifecycle buckets a status falls in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCategory {
    Initial,
    InFlight,
    TerminalSuccess,
    TerminalFailure,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ChargeStatus {
    Created,
    EnteringCardDetails,
    AuthorisationReady,
    #[serde(rename = "authorisation_3ds_required")]
    Authorisation3dsRequired,
    #[serde(rename = "authorisation_3ds_ready")]
    Authorisation3dsReady,
    AuthorisationSuccess,
    AuthorisationRejected,
    AuthorisationCancelled,
    AuthorisationError,
    AuthorisationTimeout,
    AuthorisationUnexpectedError,
    AuthorisationErrorCancelled,
    AuthorisationErrorRejected,
    AuthorisationErrorChargeMissing,
    AwaitingCaptureRequest,
    CaptureApproved,
    CaptureApprovedRetry,
    CaptureReady,
    CaptureSubmitted,
    Captured,
    CaptureError,
    CaptureUnknown,
    ExpireCancelReady,
    ExpireCancelSubmitted,
    ExpireCancelFailed,
    Expired,
    SystemCancelReady,
    SystemCancelSubmitted,
    SystemCancelError,
    SystemCancelled,
    UserCancelReady,
    UserCancelSubmitted,
    UserCancelError,
    UserCancelled,
}

use ChargeStatus::*;

impl ChargeStatus {
    pub const ALL: [ChargeStatus; 34] = [
        Created,
        EnteringCardDetails,
        AuthorisationReady,
        Authorisation3dsRequired,
        Authorisation3dsReady,
        AuthorisationSuccess,
        AuthorisationRejected,
        AuthorisationCancelled,
        AuthorisationError,
        AuthorisationTimeout,
        AuthorisationUnexpectedError,
        AuthorisationErrorCancelled,
        AuthorisationErrorRejected,
        AuthorisationErrorChargeMissing,
        AwaitingCaptureRequest,
        CaptureApproved,
        CaptureApprovedRetry,
        CaptureReady,
        CaptureSubmitted,
        Captured,
        CaptureError,
        CaptureUnknown,
        ExpireCancelReady,
        ExpireCancelSubmitted,
        ExpireCancelFailed,
        Expired,
        SystemCancelReady,
        SystemCancelSubmitted,
        SystemCancelError,
        SystemCancelled,
        UserCancelReady,
        UserCancelSubmitted,
        UserCancelError,
        UserCancelled,
    ];

    /// Statuses owned by an in-progress pipeline.
    pub const LOCK_STATUSES: [ChargeStatus; 6] = [
        AuthorisationReady,
        Authorisation3dsReady,
        CaptureReady,
        ExpireCancelReady,
        SystemCancelReady,
        UserCancelReady,
    ];

    /// Charges the gateway has never heard of.
    pub const PRE_GATEWAY: [ChargeStatus; 2] = [Created, EnteringCardDetails];

    pub const GATEWAY_AUTHORISED: [ChargeStatus; 3] = [
        Authorisation3dsRequired,
        AuthorisationSuccess,
        AwaitingCaptureRequest,
    ];

    pub const AUTHORISATION_ERROR_STATUSES: [ChargeStatus; 3] = [
        AuthorisationError,
        AuthorisationTimeout,
        AuthorisationUnexpectedError,
    ];

    pub const CAPTURE_APPROVABLE: [ChargeStatus; 2] = [AuthorisationSuccess, AwaitingCaptureRequest];

    pub const CAPTURABLE: [ChargeStatus; 2] = [CaptureApproved, CaptureApprovedRetry];

    pub const REFUNDABLE: [ChargeStatus; 2] = [CaptureSubmitted, Captured];

    pub fn as_str(&self) -> &'static str {
        match self {
            Created => "created",
            EnteringCardDetails => "entering_card_details",
            AuthorisationReady => "authorisation_ready",
            Authorisation3dsRequired => "authorisation_3ds_required",
            Authorisation3dsReady => "authorisation_3ds_ready",
            AuthorisationSuccess => "authorisation_success",
            AuthorisationRejected => "authorisation_rejected",
            AuthorisationCancelled => "authorisation_cancelled",
            AuthorisationError => "authorisation_error",
            AuthorisationTimeout => "authorisation_timeout",
            AuthorisationUnexpectedError => "authorisation_unexpected_error",
            AuthorisationErrorCancelled => "authorisation_error_cancelled",
            AuthorisationErrorRejected => "authorisation_error_rejected",
            AuthorisationErrorChargeMissing => "authorisation_error_charge_missing",
            AwaitingCaptureRequest => "awaiting_capture_request",
            CaptureApproved => "capture_approved",
            CaptureApprovedRetry => "capture_approved_retry",
            CaptureReady => "capture_ready",
            CaptureSubmitted => "capture_submitted",
            Captured => "captured",
            CaptureError => "capture_error",
            CaptureUnknown => "capture_unknown",
            ExpireCancelReady => "expire_cancel_ready",
            ExpireCancelSubmitted => "expire_cancel_submitted",
            ExpireCancelFailed => "expire_cancel_failed",
            Expired => "expired",
            SystemCancelReady => "system_cancel_ready",
            SystemCancelSubmitted => "system_cancel_submitted",
            SystemCancelError => "system_cancel_error",
            SystemCancelled => "system_cancelled",
            UserCancelReady => "user_cancel_ready",
            UserCancelSubmitted => "user_cancel_submitted",
            UserCancelError => "user_cancel_error",
            UserCancelled => "user_cancelled",
        }
    }

    /// Statuses directly reachable from this one.
    pub fn valid_transitions(&self) -> &'static [ChargeStatus] {
        match self {
            Created => &[EnteringCardDetails, Expired, SystemCancelled, UserCancelled],
            EnteringCardDetails => &[AuthorisationReady, Expired, SystemCancelled, UserCancelled],
            AuthorisationReady => &[
                AuthorisationSuccess,
                AuthorisationRejected,
                AuthorisationCancelled,
                AuthorisationError,
                AuthorisationTimeout,
                AuthorisationUnexpectedError,
                Authorisation3dsRequired,
            ],
            Authorisation3dsReady => &[
                AuthorisationSuccess,
                AuthorisationRejected,
                AuthorisationCancelled,
                AuthorisationError,
                AuthorisationTimeout,
                AuthorisationUnexpectedError,
            ],
            Authorisation3dsRequired => &[
                Authorisation3dsReady,
                AuthorisationSuccess,
                AuthorisationRejected,
                ExpireCancelReady,
                SystemCancelReady,
                UserCancelReady,
            ],
            AuthorisationSuccess => &[
                CaptureApproved,
                AwaitingCaptureRequest,
                ExpireCancelReady,
                SystemCancelReady,
                UserCancelReady,
            ],
            AwaitingCaptureRequest => &[CaptureApproved, ExpireCancelReady, SystemCancelReady],
            AuthorisationError | AuthorisationTimeout | AuthorisationUnexpectedError => &[
                AuthorisationErrorCancelled,
                AuthorisationErrorRejected,
                AuthorisationErrorChargeMissing,
            ],
            CaptureApproved | CaptureApprovedRetry => &[CaptureReady],
            CaptureReady => &[
                CaptureSubmitted,
                CaptureApprovedRetry,
                CaptureError,
                CaptureUnknown,
            ],
            CaptureSubmitted => &[Captured, CaptureError],
            CaptureUnknown => &[CaptureSubmitted, Captured, CaptureError],
            ExpireCancelReady => &[ExpireCancelSubmitted, Expired, ExpireCancelFailed],
            ExpireCancelSubmitted => &[Expired, ExpireCancelFailed],
            SystemCancelReady => &[SystemCancelSubmitted, SystemCancelled, SystemCancelError],
            SystemCancelSubmitted => &[SystemCancelled, SystemCancelError],
            UserCancelReady => &[UserCancelSubmitted, UserCancelled, UserCancelError],
            UserCancelSubmitted => &[UserCancelled, UserCancelError],
            AuthorisationRejected
            | AuthorisationCancelled
            | AuthorisationErrorCancelled
            | AuthorisationErrorRejected
            | AuthorisationErrorChargeMissing
            | Captured
            | CaptureError
            | ExpireCancelFailed
            | Expired
            | SystemCancelError
            | SystemCancelled
            | UserCancelError
            | UserCancelled => &[],
        }
    }

    pub fn can_transition_to(&self, next: ChargeStatus) -> bool {
        self.valid_transitions().contains(&next)
    }

    pub fn is_terminal(&self) -> bool {
        self.valid_transitions().is_empty()
    }

    pub fn category(&self) -> StatusCategory {
        match self {
            Created | EnteringCardDetails => StatusCategory::Initial,
            Captured
            | Expired
            | SystemCancelled
            | UserCancelled
            | AuthorisationErrorCancelled
            | AuthorisationErrorChargeMissing => StatusCategory::TerminalSuccess,
            AuthorisationRejected
            | AuthorisationCancelled
            | AuthorisationErrorRejected
            | CaptureError
            | ExpireCancelFailed
            | SystemCancelError
            | UserCancelError => StatusCategory::TerminalFailure,
            _ => StatusCategory::InFlight,
        }
    }

    pub fn is_lock_status(&self) -> bool {
        Self::LOCK_STATUSES.contains(self)
    }

    /// A notification never overwrites a charge a pipeline currently owns.
    pub fn is_blacklisted_for_notifications(&self) -> bool {
        self.is_lock_status()
    }
}

impl fmt::Display for ChargeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ChargeStatus {
    type Err = StatusParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == normalized)
            .ok_or(StatusParseError {
                kind: "charge",
                value: value.to_string(),
            })
    }
}

/// Returns true when `from -> to` is an edge of the charge state machine.
pub fn is_legal_transition(from: ChargeStatus, to: ChargeStatus) -> bool {
    from.can_transition_to(to)
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RefundStatus {
    Created,
    RefundSubmitted,
    Refunded,
    RefundError,
}

impl RefundStatus {
    pub const ALL: [RefundStatus; 4] = [
        RefundStatus::Created,
        RefundStatus::RefundSubmitted,
        RefundStatus::Refunded,
        RefundStatus::RefundError,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RefundStatus::Created => "created",
            RefundStatus::RefundSubmitted => "refund_submitted",
            RefundStatus::Refunded => "refunded",
            RefundStatus::RefundError => "refund_error",
        }
    }

    pub fn valid_transitions(&self) -> &'static [RefundStatus] {
        match self {
            RefundStatus::Created => &[
                RefundStatus::RefundSubmitted,
                RefundStatus::Refunded,
                RefundStatus::RefundError,
            ],
            RefundStatus::RefundSubmitted => &[RefundStatus::Refunded, RefundStatus::RefundError],
            RefundStatus::Refunded | RefundStatus::RefundError => &[],
        }
    }

    pub fn can_transition_to(&self, next: RefundStatus) -> bool {
        self.valid_transitions().contains(&next)
    }

    pub fn is_terminal(&self) -> bool {
        self.valid_transitions().is_empty()
    }

    /// Refunds in these statuses hold part of the charge amount.
    pub fn counts_against_charge(&self) -> bool {
        !matches!(self, RefundStatus::RefundError)
    }
}

impl fmt::Display for RefundStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RefundStatus {
    type Err = StatusParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == normalized)
            .ok_or(StatusParseError {
                kind: "refund",
                value: value.to_string(),
            })
    }
}
