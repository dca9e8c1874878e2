//! Configuration-driven governance: which fact writes are permitted,
//! which handler acts this turn, and when a capture prompt is forced.
//! Every decision is a pure function of (config, memory snapshot,
//! proposed action); no clock reads, no randomness.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::classify::IntentGuess;
use crate::domain::facts::{FactSource, FieldId};
use crate::domain::turn::{HandlerChoice, HandlerKind, RejectedHandler};
use crate::extract::{
    FIELD_ACCESS_NOTES, FIELD_CALLBACK_NUMBER, FIELD_CALLER_NAME, FIELD_PROBLEM_SUMMARY,
    FIELD_PROBLEM_URGENCY, FIELD_SERVICE_ADDRESS, FIELD_TIME_PREFERENCE,
};
use crate::memory::ConversationMemory;
use crate::routing::{default_priorities, SourceKind, SourcePriority};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldRule {
    pub allowed_sources: Vec<FactSource>,
    pub min_confidence: f32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CaptureGoal {
    pub field: String,
    pub prompt: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnMissingPolicy {
    RouterPrompts,
    LogWarning,
    Ignore,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CaptureConfig {
    pub must: Vec<CaptureGoal>,
    pub should: Vec<CaptureGoal>,
    pub nice: Vec<CaptureGoal>,
    /// Turns a must goal may stall (no must-tier progress) before a
    /// goal-directed prompt is forced.
    pub max_stall_turns: u32,
    /// Turn number by which all must goals should be captured.
    pub deadline_turns: u32,
    pub on_missing: OnMissingPolicy,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HandlerRule {
    pub enabled: bool,
    pub min_confidence: f32,
    /// Whether this handler may still produce content after the booking
    /// lock engages. Booking and escalation ignore this flag; they always
    /// survive the lock.
    pub allowed_when_locked: bool,
}

impl HandlerRule {
    fn enabled_with(min_confidence: f32) -> Self {
        Self { enabled: true, min_confidence, allowed_when_locked: false }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HandlerRules {
    pub scenario: HandlerRule,
    pub knowledge: HandlerRule,
    pub booking: HandlerRule,
    pub escalation: HandlerRule,
    pub llm: HandlerRule,
}

impl HandlerRules {
    pub fn rule(&self, kind: HandlerKind) -> &HandlerRule {
        match kind {
            HandlerKind::Scenario => &self.scenario,
            HandlerKind::Knowledge => &self.knowledge,
            HandlerKind::Booking => &self.booking,
            HandlerKind::Escalation => &self.escalation,
            HandlerKind::Llm => &self.llm,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConsentConfig {
    /// Minimum classifier confidence on a booking-intent signal before it
    /// counts as consent.
    pub min_confidence: f32,
    pub lock_after_consent: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouterRules {
    pub priorities: Vec<SourcePriority>,
}

/// Company-scoped governance configuration. Read-only during a call.
/// Unknown fields and unknown enum tags are rejected at load time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GovernanceConfig {
    pub version: u32,
    pub fields: BTreeMap<String, FieldRule>,
    pub capture: CaptureConfig,
    pub handlers: HandlerRules,
    pub consent: ConsentConfig,
    pub router: RouterRules,
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        let mut fields = BTreeMap::new();
        let open_sources = vec![
            FactSource::Extraction,
            FactSource::LlmDecision,
            FactSource::BookingHandler,
            FactSource::System,
        ];
        fields.insert(
            FIELD_CALLER_NAME.to_string(),
            FieldRule { allowed_sources: open_sources.clone(), min_confidence: 0.5 },
        );
        fields.insert(
            FIELD_CALLBACK_NUMBER.to_string(),
            FieldRule { allowed_sources: open_sources.clone(), min_confidence: 0.6 },
        );
        fields.insert(
            FIELD_SERVICE_ADDRESS.to_string(),
            FieldRule { allowed_sources: open_sources.clone(), min_confidence: 0.5 },
        );
        fields.insert(
            FIELD_PROBLEM_SUMMARY.to_string(),
            FieldRule {
                allowed_sources: vec![
                    FactSource::Extraction,
                    FactSource::Classifier,
                    FactSource::LlmDecision,
                    FactSource::BookingHandler,
                    FactSource::System,
                ],
                min_confidence: 0.4,
            },
        );
        fields.insert(
            FIELD_PROBLEM_URGENCY.to_string(),
            FieldRule {
                allowed_sources: vec![
                    FactSource::Classifier,
                    FactSource::LlmDecision,
                    FactSource::EscalationHandler,
                    FactSource::System,
                ],
                min_confidence: 0.5,
            },
        );
        fields.insert(
            FIELD_TIME_PREFERENCE.to_string(),
            FieldRule { allowed_sources: open_sources.clone(), min_confidence: 0.4 },
        );
        fields.insert(
            FIELD_ACCESS_NOTES.to_string(),
            FieldRule {
                allowed_sources: vec![FactSource::LlmDecision, FactSource::BookingHandler],
                min_confidence: 0.3,
            },
        );

        Self {
            version: 1,
            fields,
            capture: CaptureConfig {
                must: vec![
                    CaptureGoal {
                        field: FIELD_CALLER_NAME.to_string(),
                        prompt: "Can I get your name, please?".to_string(),
                    },
                    CaptureGoal {
                        field: FIELD_CALLBACK_NUMBER.to_string(),
                        prompt: "What's the best number to reach you at?".to_string(),
                    },
                    CaptureGoal {
                        field: FIELD_SERVICE_ADDRESS.to_string(),
                        prompt: "What's the address where you need service?".to_string(),
                    },
                    CaptureGoal {
                        field: FIELD_PROBLEM_SUMMARY.to_string(),
                        prompt: "Can you tell me a bit about what's going on?".to_string(),
                    },
                    CaptureGoal {
                        field: FIELD_TIME_PREFERENCE.to_string(),
                        prompt: "When would work best for a visit?".to_string(),
                    },
                ],
                should: vec![CaptureGoal {
                    field: FIELD_ACCESS_NOTES.to_string(),
                    prompt: "Anything our technician should know about getting in?".to_string(),
                }],
                nice: Vec::new(),
                max_stall_turns: 2,
                deadline_turns: 8,
                on_missing: OnMissingPolicy::RouterPrompts,
            },
            handlers: HandlerRules {
                scenario: HandlerRule::enabled_with(0.5),
                knowledge: HandlerRule::enabled_with(0.4),
                booking: HandlerRule::enabled_with(0.0),
                escalation: HandlerRule::enabled_with(0.0),
                llm: HandlerRule::enabled_with(0.0),
            },
            consent: ConsentConfig { min_confidence: 0.7, lock_after_consent: true },
            router: RouterRules { priorities: default_priorities() },
        }
    }
}

#[derive(Debug, Error)]
pub enum GovernanceConfigError {
    #[error("could not parse governance config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("governance config validation failed: {0}")]
    Validation(String),
}

impl GovernanceConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, GovernanceConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), GovernanceConfigError> {
        for (field, rule) in &self.fields {
            if !(0.0..=1.0).contains(&rule.min_confidence) {
                return Err(GovernanceConfigError::Validation(format!(
                    "fields.{field}.min_confidence must be within 0..=1"
                )));
            }
            if rule.allowed_sources.is_empty() {
                return Err(GovernanceConfigError::Validation(format!(
                    "fields.{field}.allowed_sources must not be empty"
                )));
            }
        }

        for goal in self.capture.must.iter().chain(&self.capture.should).chain(&self.capture.nice) {
            if !self.fields.contains_key(&goal.field) {
                return Err(GovernanceConfigError::Validation(format!(
                    "capture goal `{}` names a field missing from the schema",
                    goal.field
                )));
            }
        }

        if self.capture.max_stall_turns == 0 {
            return Err(GovernanceConfigError::Validation(
                "capture.max_stall_turns must be at least 1".to_string(),
            ));
        }

        if self.router.priorities.is_empty() {
            return Err(GovernanceConfigError::Validation(
                "router.priorities must not be empty".to_string(),
            ));
        }
        for priority in &self.router.priorities {
            if !(0.0..=1.0).contains(&priority.threshold) {
                return Err(GovernanceConfigError::Validation(format!(
                    "router threshold for {} must be within 0..=1",
                    priority.source.as_str()
                )));
            }
        }
        let llm_position =
            self.router.priorities.iter().position(|p| p.source == SourceKind::LlmFallback);
        if let Some(position) = llm_position {
            if position + 1 != self.router.priorities.len() {
                return Err(GovernanceConfigError::Validation(
                    "llm_fallback must be the last router priority".to_string(),
                ));
            }
        }

        if !(0.0..=1.0).contains(&self.consent.min_confidence) {
            return Err(GovernanceConfigError::Validation(
                "consent.min_confidence must be within 0..=1".to_string(),
            ));
        }

        Ok(())
    }
}

/// Why a proposed fact write was refused. Fixed small set so callers can
/// branch deterministically.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum FactRejection {
    #[error("field is not in the governance schema")]
    FieldNotInSchema,
    #[error("source is not allowed to write this field")]
    SourceNotAllowed,
    #[error("confidence is below the field threshold")]
    BelowThreshold,
    #[error("booking is locked; only booking and escalation may write")]
    BookingLocked,
}

impl FactRejection {
    pub fn code(self) -> &'static str {
        match self {
            Self::FieldNotInSchema => "field_not_in_schema",
            Self::SourceNotAllowed => "source_not_allowed",
            Self::BelowThreshold => "below_threshold",
            Self::BookingLocked => "booking_locked",
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct GovernanceEngine {
    config: GovernanceConfig,
}

impl GovernanceEngine {
    pub fn new(config: GovernanceConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GovernanceConfig {
        &self.config
    }

    /// Gate for a single fact write. The booking lock dominates: once it
    /// engages, only lock-surviving sources pass, regardless of schema.
    pub fn can_commit_fact(
        &self,
        memory: &ConversationMemory,
        field: &FieldId,
        source: FactSource,
        confidence: f32,
    ) -> Result<(), FactRejection> {
        if memory.booking.locked && !source.survives_booking_lock() {
            return Err(FactRejection::BookingLocked);
        }
        let Some(rule) = self.config.fields.get(field.as_str()) else {
            return Err(FactRejection::FieldNotInSchema);
        };
        if !rule.allowed_sources.contains(&source) {
            return Err(FactRejection::SourceNotAllowed);
        }
        if confidence < rule.min_confidence {
            return Err(FactRejection::BelowThreshold);
        }
        Ok(())
    }

    /// Pick the handler for this turn. Safety signals first, then scripted
    /// closes, then booking (consent-gated), then knowledge, with the LLM
    /// handler as the designated fallback.
    pub fn select_handler(&self, memory: &ConversationMemory, guess: &IntentGuess) -> HandlerChoice {
        let mut rejected = Vec::new();
        let mut reasoning = Vec::new();
        let signals = &guess.signals;

        if signals.maybe_emergency {
            if self.claims(memory, HandlerKind::Escalation, guess.confidence, &mut rejected) {
                reasoning.push("emergency signal routed to escalation".to_string());
                return HandlerChoice { selected: HandlerKind::Escalation, rejected, reasoning };
            }
        }

        if signals.wrong_number || signals.spam {
            if self.claims(memory, HandlerKind::Scenario, guess.confidence, &mut rejected) {
                reasoning.push("wrong-number/spam signal routed to scripted close".to_string());
                return HandlerChoice { selected: HandlerKind::Scenario, rejected, reasoning };
            }
        }

        if memory.booking.locked {
            if self.claims(memory, HandlerKind::Booking, 1.0, &mut rejected) {
                reasoning.push("booking lock active; booking handler owns the call".to_string());
                return HandlerChoice { selected: HandlerKind::Booking, rejected, reasoning };
            }
        } else if signals.booking_intent || signals.update_booking {
            if guess.confidence >= self.config.consent.min_confidence {
                if self.claims(memory, HandlerKind::Booking, guess.confidence, &mut rejected) {
                    reasoning.push(format!(
                        "consent signal at {:.2} met threshold {:.2}",
                        guess.confidence, self.config.consent.min_confidence
                    ));
                    return HandlerChoice { selected: HandlerKind::Booking, rejected, reasoning };
                }
            } else {
                rejected.push(RejectedHandler {
                    handler: HandlerKind::Booking,
                    reason: format!(
                        "consent confidence {:.2} below threshold {:.2}",
                        guess.confidence, self.config.consent.min_confidence
                    ),
                });
            }
        }

        if (signals.info_request || signals.troubleshooting || signals.billing)
            && self.claims(memory, HandlerKind::Knowledge, guess.confidence, &mut rejected)
        {
            reasoning.push("informational signal routed through knowledge tiers".to_string());
            return HandlerChoice { selected: HandlerKind::Knowledge, rejected, reasoning };
        }

        if self.claims(memory, HandlerKind::Llm, 1.0, &mut rejected) {
            reasoning.push("no handler claimed the turn; falling back to llm".to_string());
            return HandlerChoice { selected: HandlerKind::Llm, rejected, reasoning };
        }

        reasoning.push("no enabled handler claimed the turn; escalating".to_string());
        HandlerChoice { selected: HandlerKind::Escalation, rejected, reasoning }
    }

    fn claims(
        &self,
        memory: &ConversationMemory,
        kind: HandlerKind,
        confidence: f32,
        rejected: &mut Vec<RejectedHandler>,
    ) -> bool {
        let rule = self.config.handlers.rule(kind);
        if !rule.enabled {
            rejected.push(RejectedHandler { handler: kind, reason: "handler disabled".to_string() });
            return false;
        }
        let lock_exempt = matches!(kind, HandlerKind::Booking | HandlerKind::Escalation);
        if memory.booking.locked && !lock_exempt && !rule.allowed_when_locked {
            rejected.push(RejectedHandler {
                handler: kind,
                reason: "disabled while booking is locked".to_string(),
            });
            return false;
        }
        if confidence < rule.min_confidence {
            rejected.push(RejectedHandler {
                handler: kind,
                reason: format!(
                    "confidence {confidence:.2} below handler minimum {:.2}",
                    rule.min_confidence
                ),
            });
            return false;
        }
        true
    }

    /// Force a prompt at the single highest-priority missing must field
    /// when capture has stalled or the deadline has passed. Returns `None`
    /// when the configured on-missing policy is not `router_prompts`.
    pub fn should_inject_capture(&self, memory: &ConversationMemory) -> Option<CaptureGoal> {
        if self.config.capture.on_missing != OnMissingPolicy::RouterPrompts {
            return None;
        }
        let stalled = memory.capture.must.turns_without_progress >= self.config.capture.max_stall_turns;
        let past_deadline = memory.turns.len() as u32 >= self.config.capture.deadline_turns;
        if !stalled && !past_deadline {
            return None;
        }
        self.next_missing_must(memory)
    }

    /// First must goal (in configured priority order) not yet captured.
    pub fn next_missing_must(&self, memory: &ConversationMemory) -> Option<CaptureGoal> {
        self.config
            .capture
            .must
            .iter()
            .find(|goal| !memory.capture.must.is_captured(&goal.field))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use crate::classify::TurnClassifier;
    use crate::domain::call::{CallId, CompanyId};
    use crate::domain::facts::{FactSource, FieldId};
    use crate::domain::turn::HandlerKind;
    use crate::memory::ConversationMemory;

    use super::{FactRejection, GovernanceConfig, GovernanceEngine, OnMissingPolicy};

    fn memory() -> ConversationMemory {
        ConversationMemory::new(
            CallId("CA-100".to_string()),
            CompanyId("co-1".to_string()),
            Some("+15550001111".to_string()),
            &GovernanceConfig::default().capture,
            chrono::Utc::now(),
        )
    }

    fn classify(text: &str) -> crate::classify::IntentGuess {
        TurnClassifier::default().classify(text)
    }

    #[test]
    fn unknown_field_is_rejected_with_schema_code() {
        let engine = GovernanceEngine::default();
        let error = engine
            .can_commit_fact(&memory(), &FieldId::new("favorite_color"), FactSource::Extraction, 0.9)
            .expect_err("unknown field must be rejected");
        assert_eq!(error, FactRejection::FieldNotInSchema);
        assert_eq!(error.code(), "field_not_in_schema");
    }

    #[test]
    fn disallowed_source_and_low_confidence_have_distinct_codes() {
        let engine = GovernanceEngine::default();
        let memory = memory();

        // access_notes only accepts llm_decision/booking_handler writes.
        assert_eq!(
            engine.can_commit_fact(
                &memory,
                &FieldId::new("access_notes"),
                FactSource::Extraction,
                0.9
            ),
            Err(FactRejection::SourceNotAllowed)
        );
        assert_eq!(
            engine.can_commit_fact(
                &memory,
                &FieldId::new("callback_number"),
                FactSource::Extraction,
                0.2
            ),
            Err(FactRejection::BelowThreshold)
        );
    }

    #[test]
    fn booking_lock_rejects_every_non_booking_source() {
        let engine = GovernanceEngine::default();
        let mut memory = memory();
        memory.booking.locked = true;

        for source in [FactSource::Extraction, FactSource::Classifier, FactSource::LlmDecision] {
            assert_eq!(
                engine.can_commit_fact(&memory, &FieldId::new("caller_name"), source, 0.99),
                Err(FactRejection::BookingLocked),
                "{source:?} must be rejected while locked"
            );
        }
        assert!(engine
            .can_commit_fact(&memory, &FieldId::new("caller_name"), FactSource::BookingHandler, 0.9)
            .is_ok());
    }

    #[test]
    fn booking_handler_is_never_selected_before_consent_confidence() {
        let engine = GovernanceEngine::default();
        let memory = memory();

        // Weak booking language: one keyword, confidence 0.7 is the floor,
        // raise the config threshold so the signal falls short.
        let mut config = GovernanceConfig::default();
        config.consent.min_confidence = 0.9;
        let strict = GovernanceEngine::new(config);

        let guess = classify("i want to book an appointment");
        assert!(guess.signals.booking_intent);
        let choice = strict.select_handler(&memory, &guess);
        assert_ne!(choice.selected, HandlerKind::Booking);
        assert!(choice
            .rejected
            .iter()
            .any(|rejection| rejection.handler == HandlerKind::Booking));

        // Default threshold accepts the same signal.
        let choice = engine.select_handler(&memory, &guess);
        assert_eq!(choice.selected, HandlerKind::Booking);
    }

    #[test]
    fn emergency_signal_preempts_booking_language() {
        let engine = GovernanceEngine::default();
        let guess = classify("gas leak please send someone now");
        let choice = engine.select_handler(&memory(), &guess);
        assert_eq!(choice.selected, HandlerKind::Escalation);
    }

    #[test]
    fn lock_routes_every_turn_to_the_booking_handler() {
        let engine = GovernanceEngine::default();
        let mut memory = memory();
        memory.booking.locked = true;

        let guess = classify("actually what are your hours");
        let choice = engine.select_handler(&memory, &guess);
        assert_eq!(choice.selected, HandlerKind::Booking);
    }

    #[test]
    fn llm_is_the_fallback_when_nothing_claims_the_turn() {
        let engine = GovernanceEngine::default();
        let guess = classify("hmm let me think");
        let choice = engine.select_handler(&memory(), &guess);
        assert_eq!(choice.selected, HandlerKind::Llm);
    }

    #[test]
    fn capture_injection_targets_highest_priority_missing_field() {
        let engine = GovernanceEngine::default();
        let mut memory = memory();
        memory.capture.must.turns_without_progress = 3;

        let goal = engine.should_inject_capture(&memory).expect("stalled call must inject");
        assert_eq!(goal.field, "caller_name");
    }

    #[test]
    fn capture_injection_respects_the_on_missing_policy() {
        let mut config = GovernanceConfig::default();
        config.capture.on_missing = OnMissingPolicy::Ignore;
        let engine = GovernanceEngine::new(config);

        let mut memory = memory();
        memory.capture.must.turns_without_progress = 10;
        assert!(engine.should_inject_capture(&memory).is_none());
    }

    #[test]
    fn config_with_unknown_fields_fails_at_load() {
        let raw = r#"{
            "version": 1,
            "fields": {},
            "capture": {"must": [], "should": [], "nice": [], "max_stall_turns": 2, "deadline_turns": 8, "on_missing": "router_prompts"},
            "handlers": {
                "scenario": {"enabled": true, "min_confidence": 0.5, "allowed_when_locked": false},
                "knowledge": {"enabled": true, "min_confidence": 0.4, "allowed_when_locked": false},
                "booking": {"enabled": true, "min_confidence": 0.0, "allowed_when_locked": false},
                "escalation": {"enabled": true, "min_confidence": 0.0, "allowed_when_locked": false},
                "llm": {"enabled": true, "min_confidence": 0.0, "allowed_when_locked": false}
            },
            "consent": {"min_confidence": 0.7, "lock_after_consent": true},
            "router": {"priorities": [{"source": "company_kb", "threshold": 0.6}]},
            "surprise_knob": true
        }"#;
        assert!(GovernanceConfig::from_json_str(raw).is_err());
    }

    #[test]
    fn llm_fallback_must_sit_last_in_the_priority_list() {
        let mut config = GovernanceConfig::default();
        config.router.priorities.reverse();
        assert!(config.validate().is_err());
    }

    #[test]
    fn default_config_passes_its_own_validation() {
        assert!(GovernanceConfig::default().validate().is_ok());
    }
}
