use serde::{Deserialize, Serialize};

/// Identifier of one structured capture field (e.g. `caller_name`).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FieldId(pub String);

impl FieldId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Which component proposed a fact write. Governance decides per field
/// which sources are allowed to write it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactSource {
    Extraction,
    Classifier,
    LlmDecision,
    BookingHandler,
    EscalationHandler,
    System,
}

impl FactSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Extraction => "extraction",
            Self::Classifier => "classifier",
            Self::LlmDecision => "llm_decision",
            Self::BookingHandler => "booking_handler",
            Self::EscalationHandler => "escalation_handler",
            Self::System => "system",
        }
    }

    /// Sources that remain writable after the booking lock engages.
    pub fn survives_booking_lock(self) -> bool {
        matches!(self, Self::BookingHandler | Self::EscalationHandler | Self::System)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FactRecord {
    pub value: String,
    pub source: FactSource,
    pub confidence: f32,
    pub committed_at_turn: u32,
}

/// A fact write proposed by extraction or a handler, not yet committed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProposedFact {
    pub field: FieldId,
    pub value: String,
    pub source: FactSource,
    pub confidence: f32,
}

impl ProposedFact {
    pub fn new(
        field: impl Into<String>,
        value: impl Into<String>,
        source: FactSource,
        confidence: f32,
    ) -> Self {
        Self { field: FieldId::new(field), value: value.into(), source, confidence }
    }
}
