use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CallId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CompanyId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateId(pub String);

/// Conversation phase for one active call. Transitions are table-driven;
/// Confirmation is unreachable without passing through Booking.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallPhase {
    Greeting,
    Discovery,
    Booking,
    Confirmation,
    Closing,
}

impl CallPhase {
    pub fn can_transition_to(self, next: CallPhase) -> bool {
        use CallPhase::{Booking, Closing, Confirmation, Discovery, Greeting};
        matches!(
            (self, next),
            (Greeting, Discovery)
                | (Greeting, Booking)
                | (Greeting, Closing)
                | (Discovery, Booking)
                | (Discovery, Closing)
                | (Booking, Confirmation)
                | (Booking, Discovery)
                | (Booking, Closing)
                | (Confirmation, Booking)
                | (Confirmation, Closing)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Greeting => "greeting",
            Self::Discovery => "discovery",
            Self::Booking => "booking",
            Self::Confirmation => "confirmation",
            Self::Closing => "closing",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseChange {
    pub from: CallPhase,
    pub to: CallPhase,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::CallPhase;

    #[test]
    fn confirmation_is_only_reachable_from_booking() {
        for phase in [CallPhase::Greeting, CallPhase::Discovery, CallPhase::Closing] {
            assert!(!phase.can_transition_to(CallPhase::Confirmation), "{phase:?}");
        }
        assert!(CallPhase::Booking.can_transition_to(CallPhase::Confirmation));
    }

    #[test]
    fn closing_is_terminal() {
        for next in [
            CallPhase::Greeting,
            CallPhase::Discovery,
            CallPhase::Booking,
            CallPhase::Confirmation,
        ] {
            assert!(!CallPhase::Closing.can_transition_to(next));
        }
    }
}
