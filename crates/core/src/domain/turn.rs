use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::classify::IntentKind;
use crate::domain::call::PhaseChange;
use crate::domain::facts::{FieldId, ProposedFact};

/// The handlers governance may hand a turn to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerKind {
    Scenario,
    Knowledge,
    Booking,
    Escalation,
    Llm,
}

impl HandlerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Scenario => "scenario",
            Self::Knowledge => "knowledge",
            Self::Booking => "booking",
            Self::Escalation => "escalation",
            Self::Llm => "llm",
        }
    }

    pub fn all() -> [HandlerKind; 5] {
        [Self::Scenario, Self::Knowledge, Self::Booking, Self::Escalation, Self::Llm]
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CallerInput {
    pub raw: String,
    pub cleaned: String,
    pub confidence: f32,
}

impl CallerInput {
    pub fn from_raw(raw: impl Into<String>, confidence: f32) -> Self {
        let raw = raw.into();
        let cleaned = clean_utterance(&raw);
        Self { raw, cleaned, confidence }
    }
}

/// Lowercase, collapse whitespace, strip characters the classifier and
/// extractors never look at.
pub fn clean_utterance(raw: &str) -> String {
    let mut cleaned = String::with_capacity(raw.len());
    for character in raw.chars() {
        if character.is_alphanumeric() || matches!(character, '\'' | '-') {
            cleaned.extend(character.to_lowercase());
        } else {
            cleaned.push(' ');
        }
    }
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub proposed: Vec<ProposedFact>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedHandler {
    pub handler: HandlerKind,
    pub reason: String,
}

/// Which handler acted this turn, which were considered and passed over,
/// and the reasoning chain behind the pick.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerChoice {
    pub selected: HandlerKind,
    pub rejected: Vec<RejectedHandler>,
    pub reasoning: Vec<String>,
}

impl HandlerChoice {
    pub fn new(selected: HandlerKind) -> Self {
        Self { selected, rejected: Vec::new(), reasoning: Vec::new() }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnDelta {
    pub facts_added: Vec<FieldId>,
    pub facts_updated: Vec<FieldId>,
    pub phase_transition: Option<PhaseChange>,
}

/// One caller-utterance/agent-response exchange, immutable once built.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TurnRecord {
    pub turn_number: u32,
    pub occurred_at: DateTime<Utc>,
    pub caller_input: CallerInput,
    pub intent: IntentKind,
    pub intent_confidence: f32,
    pub extraction: ExtractionResult,
    pub routing: HandlerChoice,
    pub response_text: String,
    pub response_latency_ms: u64,
    pub delta: TurnDelta,
}

#[cfg(test)]
mod tests {
    use super::clean_utterance;

    #[test]
    fn cleaning_lowercases_and_collapses_noise() {
        assert_eq!(clean_utterance("  Hi, my NAME is   Dana!  "), "hi my name is dana");
        assert_eq!(clean_utterance("Who IS this??"), "who is this");
    }
}
