use crate::charges::status::ChargeStatus;

/// Describes one cancellation-style transition: where it may start, the lock
/// status it claims while the gateway is called, and where it can end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusFlow {
    pub name: &'static str,
    pub sources: &'static [ChargeStatus],
    pub lock: ChargeStatus,
    pub submitted: ChargeStatus,
    pub success: ChargeStatus,
    pub failure: ChargeStatus,
}

impl StatusFlow {
    pub const USER_CANCELLATION: StatusFlow = StatusFlow {
        name: "user_cancellation",
        sources: &[
            ChargeStatus::Created,
            ChargeStatus::EnteringCardDetails,
            ChargeStatus::Authorisation3dsRequired,
            ChargeStatus::AuthorisationSuccess,
        ],
        lock: ChargeStatus::UserCancelReady,
        submitted: ChargeStatus::UserCancelSubmitted,
        success: ChargeStatus::UserCancelled,
        failure: ChargeStatus::UserCancelError,
    };

    pub const SYSTEM_CANCELLATION: StatusFlow = StatusFlow {
        name: "system_cancellation",
        sources: &[
            ChargeStatus::Created,
            ChargeStatus::EnteringCardDetails,
            ChargeStatus::Authorisation3dsRequired,
            ChargeStatus::AuthorisationSuccess,
            ChargeStatus::AwaitingCaptureRequest,
        ],
        lock: ChargeStatus::SystemCancelReady,
        submitted: ChargeStatus::SystemCancelSubmitted,
        success: ChargeStatus::SystemCancelled,
        failure: ChargeStatus::SystemCancelError,
    };

    pub const EXPIRE: StatusFlow = StatusFlow {
        name: "expire",
        sources: &[
            ChargeStatus::Created,
            ChargeStatus::EnteringCardDetails,
            ChargeStatus::Authorisation3dsRequired,
            ChargeStatus::AuthorisationSuccess,
            ChargeStatus::AwaitingCaptureRequest,
        ],
        lock: ChargeStatus::ExpireCancelReady,
        submitted: ChargeStatus::ExpireCancelSubmitted,
        success: ChargeStatus::Expired,
        failure: ChargeStatus::ExpireCancelFailed,
    };

    pub const ALL: [StatusFlow; 3] = [
        StatusFlow::USER_CANCELLATION,
        StatusFlow::SYSTEM_CANCELLATION,
        StatusFlow::EXPIRE,
    ];

    pub fn is_source(&self, status: ChargeStatus) -> bool {
        self.sources.contains(&status)
    }

    /// Statuses meaning some cancellation already owns or has finished
    /// handing the charge to the gateway.
    pub fn is_cancellation_in_progress(status: ChargeStatus) -> bool {
        Self::ALL
            .iter()
            .any(|flow| flow.lock == status || flow.submitted == status)
    }

    /// The terminal status a submitted cancellation settles into once the
    /// gateway confirms it.
    pub fn settle_submitted(status: ChargeStatus) -> Option<ChargeStatus> {
        Self::ALL
            .iter()
            .find(|flow| flow.submitted == status)
            .map(|flow| flow.success)
    }

    pub fn fail_submitted(status: ChargeStatus) -> Option<ChargeStatus> {
        Self::ALL
            .iter()
            .find(|flow| flow.submitted == status)
            .map(|flow| flow.failure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_flow_edge_is_legal() {
        for flow in StatusFlow::ALL {
            for source in flow.sources {
                if ChargeStatus::PRE_GATEWAY.contains(source) {
                    assert!(source.can_transition_to(flow.success), "{} {}", flow.name, source);
                } else {
                    assert!(source.can_transition_to(flow.lock), "{} {}", flow.name, source);
                }
            }
            assert!(flow.lock.can_transition_to(flow.submitted));
            assert!(flow.lock.can_transition_to(flow.success));
            assert!(flow.lock.can_transition_to(flow.failure));
            assert!(flow.submitted.can_transition_to(flow.success));
            assert!(flow.submitted.can_transition_to(flow.failure));
        }
    }

    #[test]
    fn settles_submitted_cancellations() {
        assert_eq!(
            StatusFlow::settle_submitted(ChargeStatus::UserCancelSubmitted),
            Some(ChargeStatus::UserCancelled)
        );
        assert_eq!(
            StatusFlow::settle_submitted(ChargeStatus::ExpireCancelSubmitted),
            Some(ChargeStatus::Expired)
        );
        assert_eq!(StatusFlow::settle_submitted(ChargeStatus::Captured), None);
    }
}
