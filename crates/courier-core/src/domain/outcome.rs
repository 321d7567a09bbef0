//! Delivery outcome model.
//!
//! The transport reports a small closed set of numeric result codes (the
//! platform's SMS manager numbering). They collapse into two outcomes the
//! engine cares about: the message went out, or it did not and here is why.

use serde::{Deserialize, Serialize};

/// Raw result code reported by the transport for one message part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultCode {
    Ok,
    GenericFailure,
    RadioOff,
    NullPdu,
    NoService,
    Unknown(i32),
}

impl ResultCode {
    pub const OK: i32 = -1;
    pub const GENERIC_FAILURE: i32 = 1;
    pub const RADIO_OFF: i32 = 2;
    pub const NULL_PDU: i32 = 3;
    pub const NO_SERVICE: i32 = 4;

    pub fn from_code(code: i32) -> Self {
        match code {
            Self::OK => ResultCode::Ok,
            Self::GENERIC_FAILURE => ResultCode::GenericFailure,
            Self::RADIO_OFF => ResultCode::RadioOff,
            Self::NULL_PDU => ResultCode::NullPdu,
            Self::NO_SERVICE => ResultCode::NoService,
            other => ResultCode::Unknown(other),
        }
    }

    pub fn code(self) -> i32 {
        match self {
            ResultCode::Ok => Self::OK,
            ResultCode::GenericFailure => Self::GENERIC_FAILURE,
            ResultCode::RadioOff => Self::RADIO_OFF,
            ResultCode::NullPdu => Self::NULL_PDU,
            ResultCode::NoService => Self::NO_SERVICE,
            ResultCode::Unknown(code) => code,
        }
    }

    pub fn is_success(self) -> bool {
        self == ResultCode::Ok
    }

    /// Map to the engine's outcome.
    pub fn into_outcome(self) -> DeliveryOutcome {
        let reason = match self {
            ResultCode::Ok => return DeliveryOutcome::Success,
            ResultCode::GenericFailure => "generic failure".to_string(),
            ResultCode::RadioOff => "radio off".to_string(),
            ResultCode::NullPdu => "null PDU".to_string(),
            ResultCode::NoService => "no service".to_string(),
            ResultCode::Unknown(code) => format!("unknown result code {code}"),
        };
        DeliveryOutcome::Failure {
            reason,
            code: Some(self.code()),
        }
    }
}

/// What happened to one dispatch attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Success,
    Failure {
        reason: String,
        /// Transport code when the failure came from the transport; `None`
        /// for failures raised before the transport was reached.
        code: Option<i32>,
    },
}

impl DeliveryOutcome {
    pub fn failure(reason: impl Into<String>) -> Self {
        DeliveryOutcome::Failure {
            reason: reason.into(),
            code: None,
        }
    }

    /// Failure raised by the dispatcher's own checks.
    pub fn validation_failed(detail: impl std::fmt::Display) -> Self {
        Self::failure(format!("validation-failed: {detail}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(-1, ResultCode::Ok)]
    #[case(1, ResultCode::GenericFailure)]
    #[case(2, ResultCode::RadioOff)]
    #[case(3, ResultCode::NullPdu)]
    #[case(4, ResultCode::NoService)]
    #[case(42, ResultCode::Unknown(42))]
    fn codes_map_both_ways(#[case] raw: i32, #[case] expected: ResultCode) {
        let code = ResultCode::from_code(raw);
        assert_eq!(code, expected);
        assert_eq!(code.code(), raw);
    }

    #[test]
    fn ok_is_success_everything_else_fails() {
        assert_eq!(ResultCode::Ok.into_outcome(), DeliveryOutcome::Success);

        match ResultCode::NoService.into_outcome() {
            DeliveryOutcome::Failure { reason, code } => {
                assert_eq!(reason, "no service");
                assert_eq!(code, Some(4));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn validation_failure_carries_no_code() {
        let outcome = DeliveryOutcome::validation_failed("empty payload");
        assert_eq!(
            outcome,
            DeliveryOutcome::Failure {
                reason: "validation-failed: empty payload".to_string(),
                code: None,
            }
        );
    }
}
