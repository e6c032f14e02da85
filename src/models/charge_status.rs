use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};
use thiserror::Error;

/// A charge status transition that is not present in the legal-transition
/// table. Carried as data so callers can decide between failing the request
/// (synchronous path) and logging and skipping (notification path).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid state transition {from} -> {to}")]
pub struct InvalidStateTransition {
    pub from: ChargeStatus,
    pub to: ChargeStatus,
}

/// Externally visible charge state, as reported on the public API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ExternalChargeState {
    Created,
    Started,
    Submitted,
    Success,
    FailedRejected,
    FailedExpired,
    FailedCancelled,
    Cancelled,
    Error,
}

/// Internal charge lifecycle status.
///
/// The successor sets in [`ChargeStatus::successors`] are the single source
/// of truth for legal transitions; every service consults this table and no
/// service hand-rolls its own checks. Statuses are persisted under their
/// SCREAMING_SNAKE_CASE tokens.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChargeStatus {
    Created,
    EnteringCardDetails,

    AuthorisationReady,
    AuthorisationSuccess,
    AuthorisationRejected,
    AuthorisationError,
    AuthorisationTimeout,
    AuthorisationUnexpectedError,
    AuthorisationCancelled,
    AuthorisationAborted,
    #[strum(serialize = "AUTHORISATION_3DS_REQUIRED")]
    #[serde(rename = "AUTHORISATION_3DS_REQUIRED")]
    Authorisation3dsRequired,

    CaptureApproved,
    CaptureApprovedRetry,
    CaptureReady,
    CaptureSubmitted,
    Captured,
    CaptureUnknown,
    CaptureError,

    UserCancelReady,
    UserCancelSubmitted,
    UserCancelError,
    UserCancelled,

    SystemCancelReady,
    SystemCancelSubmitted,
    SystemCancelError,
    SystemCancelled,

    ExpireCancelReady,
    ExpireCancelSubmitted,
    ExpireCancelFailed,
    Expired,
}

impl ChargeStatus {
    /// Legal successor statuses. A status with no successors is terminal.
    pub fn successors(self) -> &'static [ChargeStatus] {
        use ChargeStatus::*;
        match self {
            Created => &[EnteringCardDetails, UserCancelled, SystemCancelled, Expired],
            EnteringCardDetails => &[
                AuthorisationReady,
                AuthorisationAborted,
                UserCancelled,
                SystemCancelled,
                Expired,
            ],
            AuthorisationReady => &[
                AuthorisationSuccess,
                AuthorisationRejected,
                AuthorisationError,
                AuthorisationTimeout,
                AuthorisationUnexpectedError,
                AuthorisationCancelled,
                Authorisation3dsRequired,
            ],
            Authorisation3dsRequired => &[
                AuthorisationSuccess,
                AuthorisationRejected,
                AuthorisationError,
                AuthorisationCancelled,
                UserCancelReady,
                SystemCancelReady,
                ExpireCancelReady,
            ],
            AuthorisationSuccess => &[
                CaptureApproved,
                UserCancelReady,
                SystemCancelReady,
                ExpireCancelReady,
            ],
            CaptureApproved => &[CaptureReady, CaptureError],
            CaptureApprovedRetry => &[CaptureReady, CaptureError],
            CaptureReady => &[CaptureSubmitted, CaptureApprovedRetry, CaptureError],
            CaptureSubmitted => &[Captured, CaptureUnknown],
            CaptureUnknown => &[Captured, CaptureError],
            UserCancelReady => &[UserCancelSubmitted, UserCancelled, UserCancelError],
            UserCancelSubmitted => &[UserCancelled, UserCancelError],
            SystemCancelReady => &[SystemCancelSubmitted, SystemCancelled, SystemCancelError],
            SystemCancelSubmitted => &[SystemCancelled, SystemCancelError],
            ExpireCancelReady => &[ExpireCancelSubmitted, Expired, ExpireCancelFailed],
            ExpireCancelSubmitted => &[Expired, ExpireCancelFailed],
            AuthorisationRejected
            | AuthorisationError
            | AuthorisationTimeout
            | AuthorisationUnexpectedError
            | AuthorisationCancelled
            | AuthorisationAborted
            | Captured
            | CaptureError
            | UserCancelError
            | UserCancelled
            | SystemCancelError
            | SystemCancelled
            | ExpireCancelFailed
            | Expired => &[],
        }
    }

    pub fn is_terminal(self) -> bool {
        self.successors().is_empty()
    }

    pub fn can_transition(self, next: ChargeStatus) -> bool {
        self.successors().contains(&next)
    }

    pub fn assert_legal(self, next: ChargeStatus) -> Result<(), InvalidStateTransition> {
        if self.can_transition(next) {
            Ok(())
        } else {
            Err(InvalidStateTransition {
                from: self,
                to: next,
            })
        }
    }

    pub fn to_external(self) -> ExternalChargeState {
        use ChargeStatus::*;
        match self {
            Created => ExternalChargeState::Created,
            EnteringCardDetails | AuthorisationReady | Authorisation3dsRequired => {
                ExternalChargeState::Started
            }
            AuthorisationSuccess
            | UserCancelReady
            | UserCancelSubmitted
            | SystemCancelReady
            | SystemCancelSubmitted
            | ExpireCancelReady
            | ExpireCancelSubmitted => ExternalChargeState::Submitted,
            CaptureApproved | CaptureApprovedRetry | CaptureReady | CaptureSubmitted | Captured => {
                ExternalChargeState::Success
            }
            AuthorisationRejected => ExternalChargeState::FailedRejected,
            AuthorisationCancelled | UserCancelled | UserCancelError => {
                ExternalChargeState::FailedCancelled
            }
            SystemCancelled | SystemCancelError => ExternalChargeState::Cancelled,
            Expired | ExpireCancelFailed => ExternalChargeState::FailedExpired,
            AuthorisationError
            | AuthorisationTimeout
            | AuthorisationUnexpectedError
            | AuthorisationAborted
            | CaptureUnknown
            | CaptureError => ExternalChargeState::Error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    #[test]
    fn assert_legal_agrees_with_successor_table() {
        for from in ChargeStatus::iter() {
            for to in ChargeStatus::iter() {
                let legal = from.successors().contains(&to);
                assert_eq!(
                    from.assert_legal(to).is_ok(),
                    legal,
                    "{from} -> {to} disagreement"
                );
            }
        }
    }

    #[test]
    fn no_status_transitions_to_itself() {
        for status in ChargeStatus::iter() {
            assert!(
                !status.can_transition(status),
                "{status} must not be its own successor"
            );
        }
    }

    #[rstest]
    #[case(ChargeStatus::Created, ChargeStatus::EnteringCardDetails, true)]
    #[case(
        ChargeStatus::EnteringCardDetails,
        ChargeStatus::AuthorisationReady,
        true
    )]
    #[case(
        ChargeStatus::AuthorisationReady,
        ChargeStatus::AuthorisationSuccess,
        true
    )]
    #[case(ChargeStatus::AuthorisationSuccess, ChargeStatus::CaptureApproved, true)]
    #[case(ChargeStatus::CaptureReady, ChargeStatus::CaptureSubmitted, true)]
    #[case(ChargeStatus::CaptureSubmitted, ChargeStatus::Captured, true)]
    #[case(ChargeStatus::Captured, ChargeStatus::CaptureSubmitted, false)]
    #[case(ChargeStatus::Created, ChargeStatus::Captured, false)]
    #[case(
        ChargeStatus::AuthorisationRejected,
        ChargeStatus::AuthorisationSuccess,
        false
    )]
    fn spot_checks(#[case] from: ChargeStatus, #[case] to: ChargeStatus, #[case] legal: bool) {
        assert_eq!(from.can_transition(to), legal);
    }

    #[test]
    fn terminal_statuses_have_no_successors() {
        assert!(ChargeStatus::Captured.is_terminal());
        assert!(ChargeStatus::Expired.is_terminal());
        assert!(ChargeStatus::AuthorisationRejected.is_terminal());
        assert!(!ChargeStatus::CaptureSubmitted.is_terminal());
        assert!(!ChargeStatus::Created.is_terminal());
    }

    #[test]
    fn status_tokens_round_trip_via_strings() {
        for status in ChargeStatus::iter() {
            let token = status.to_string();
            assert_eq!(ChargeStatus::from_str(&token).unwrap(), status);
        }
        assert_eq!(
            ChargeStatus::Authorisation3dsRequired.to_string(),
            "AUTHORISATION_3DS_REQUIRED"
        );
        assert!(ChargeStatus::from_str("NOT_A_STATUS").is_err());
    }

    #[test]
    fn external_state_mapping_covers_capture_path() {
        assert_eq!(
            ChargeStatus::Captured.to_external(),
            ExternalChargeState::Success
        );
        assert_eq!(
            ChargeStatus::AuthorisationTimeout.to_external(),
            ExternalChargeState::Error
        );
        assert_eq!(
            ChargeStatus::UserCancelled.to_external(),
            ExternalChargeState::FailedCancelled
        );
    }
}
