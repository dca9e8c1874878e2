use thiserror::Error;

use crate::governance::FactRejection;
use crate::memory::MemoryError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error(transparent)]
    Memory(#[from] MemoryError),
    #[error("fact write rejected: {0}")]
    FactWrite(#[from] FactRejection),
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

/// Application-level failure taxonomy. Recovered conditions (fact
/// rejections, generation parse failures) never surface here; the turn
/// completes and the condition is traced. What does surface is fatal for
/// the operation that raised it.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("configuration failure: {0}")]
    Configuration(String),
    #[error("booking creation failed: {0}")]
    BookingCreation(String),
    #[error("persistence unavailable: {0}")]
    Persistence(String),
    #[error("retention violation: {0}")]
    RetentionViolation(String),
}

impl ApplicationError {
    /// Non-technical utterance the caller-facing layer may speak when the
    /// turn cannot complete. Internal detail stays in the trace.
    pub fn caller_utterance(&self) -> &'static str {
        match self {
            Self::Persistence(_) => {
                "I'm so sorry, please hold for just a moment while I get that sorted."
            }
            Self::BookingCreation(_) => {
                "I wasn't able to finish the booking on my end, but a team member will call you right back to lock it in."
            }
            _ => "I'm sorry, something went wrong on my end. Let me get someone to help you.",
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::governance::FactRejection;

    use super::{ApplicationError, DomainError};

    #[test]
    fn fact_rejection_wraps_into_domain_error() {
        let error = DomainError::from(FactRejection::BelowThreshold);
        assert!(error.to_string().contains("confidence is below"));
    }

    #[test]
    fn persistence_failure_has_a_hold_message() {
        let error = ApplicationError::Persistence("keyed store timed out".to_owned());
        assert!(error.caller_utterance().contains("hold"));
        assert!(!error.caller_utterance().contains("store"), "must stay non-technical");
    }
}
