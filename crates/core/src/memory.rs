//! Runtime truth for one active call: captured facts, committed turns,
//! phase, capture progress, booking state, and the append-only tier trace.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::classify::IntentKind;
use crate::domain::booking::{AppointmentId, BookingState};
use crate::domain::call::{CallId, CallPhase, CompanyId, PhaseChange, TemplateId};
use crate::domain::facts::{FactRecord, FieldId, ProposedFact};
use crate::domain::summary::CallOutcome;
use crate::domain::turn::{
    CallerInput, ExtractionResult, HandlerChoice, TurnDelta, TurnRecord,
};
use crate::governance::{CaptureConfig, FactRejection, GovernanceEngine};
use crate::routing::{TraceEntry, TraceOutcome};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum MemoryError {
    #[error("turn {got} committed out of order; expected {expected}")]
    TurnOutOfOrder { expected: u32, got: u32 },
    #[error("turn {0} is already open")]
    TurnAlreadyOpen(u32),
    #[error("no turn is open")]
    NoOpenTurn,
    #[error("turn is missing {0} and cannot be committed")]
    TurnIncomplete(&'static str),
    #[error("phase transition {from:?} -> {to:?} is not allowed")]
    InvalidPhaseTransition { from: CallPhase, to: CallPhase },
}

/// Capture state for one goal tier (must/should/nice).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureTier {
    pub fields: BTreeMap<String, bool>,
    pub turns_without_progress: u32,
}

impl CaptureTier {
    fn seeded(fields: impl Iterator<Item = String>) -> Self {
        Self { fields: fields.map(|field| (field, false)).collect(), turns_without_progress: 0 }
    }

    pub fn is_captured(&self, field: &str) -> bool {
        self.fields.get(field).copied().unwrap_or(false)
    }

    pub fn all_captured(&self) -> bool {
        self.fields.values().all(|captured| *captured)
    }

    fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    fn mark_captured(&mut self, field: &str) {
        if let Some(captured) = self.fields.get_mut(field) {
            *captured = true;
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureProgress {
    pub must: CaptureTier,
    pub should: CaptureTier,
    pub nice: CaptureTier,
}

impl CaptureProgress {
    fn from_config(config: &CaptureConfig) -> Self {
        Self {
            must: CaptureTier::seeded(config.must.iter().map(|goal| goal.field.clone())),
            should: CaptureTier::seeded(config.should.iter().map(|goal| goal.field.clone())),
            nice: CaptureTier::seeded(config.nice.iter().map(|goal| goal.field.clone())),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FactWrite {
    Added,
    Updated,
}

/// Accumulates one in-flight turn; finalized exactly once by
/// `ConversationMemory::commit_turn`.
#[derive(Clone, Debug)]
pub struct TurnRecordBuilder {
    turn_number: u32,
    started_at: DateTime<Utc>,
    caller_input: Option<CallerInput>,
    intent: IntentKind,
    intent_confidence: f32,
    extraction: ExtractionResult,
    routing: Option<HandlerChoice>,
    delta: TurnDelta,
}

impl TurnRecordBuilder {
    fn new(turn_number: u32, started_at: DateTime<Utc>) -> Self {
        Self {
            turn_number,
            started_at,
            caller_input: None,
            intent: IntentKind::Unknown,
            intent_confidence: 0.0,
            extraction: ExtractionResult::default(),
            routing: None,
            delta: TurnDelta::default(),
        }
    }

    pub fn turn_number(&self) -> u32 {
        self.turn_number
    }

    pub fn set_caller_input(&mut self, input: CallerInput) {
        self.caller_input = Some(input);
    }

    pub fn set_intent(&mut self, intent: IntentKind, confidence: f32) {
        self.intent = intent;
        self.intent_confidence = confidence;
    }

    pub fn set_extraction(&mut self, extraction: ExtractionResult) {
        self.extraction = extraction;
    }

    pub fn set_routing(&mut self, routing: HandlerChoice) {
        self.routing = Some(routing);
    }

    fn finalize(self, response_text: String, latency_ms: u64) -> Result<TurnRecord, MemoryError> {
        let caller_input = self.caller_input.ok_or(MemoryError::TurnIncomplete("caller input"))?;
        let routing = self.routing.ok_or(MemoryError::TurnIncomplete("routing decision"))?;
        Ok(TurnRecord {
            turn_number: self.turn_number,
            occurred_at: self.started_at,
            caller_input,
            intent: self.intent,
            intent_confidence: self.intent_confidence,
            extraction: self.extraction,
            routing,
            response_text,
            response_latency_ms: latency_ms,
            delta: self.delta,
        })
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConversationMemory {
    pub call_id: CallId,
    pub company_id: CompanyId,
    pub template_id: Option<TemplateId>,
    pub caller_phone: Option<String>,
    pub phase: CallPhase,
    pub facts: BTreeMap<FieldId, FactRecord>,
    pub turns: Vec<TurnRecord>,
    pub capture: CaptureProgress,
    pub booking: BookingState,
    pub tier_trace: Vec<TraceEntry>,
    pub outcome_hint: Option<CallOutcome>,
    pub started_at: DateTime<Utc>,
    /// Optimistic concurrency token, bumped by the session store on save.
    pub version: u64,
    #[serde(skip)]
    open_turn: Option<TurnRecordBuilder>,
}

impl ConversationMemory {
    pub fn new(
        call_id: CallId,
        company_id: CompanyId,
        caller_phone: Option<String>,
        capture: &CaptureConfig,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            call_id,
            company_id,
            template_id: None,
            caller_phone,
            phase: CallPhase::Greeting,
            facts: BTreeMap::new(),
            turns: Vec::new(),
            capture: CaptureProgress::from_config(capture),
            booking: BookingState::default(),
            tier_trace: Vec::new(),
            outcome_hint: None,
            started_at,
            version: 0,
            open_turn: None,
        }
    }

    pub fn with_template(mut self, template_id: TemplateId) -> Self {
        self.template_id = Some(template_id);
        self
    }

    pub fn next_turn_number(&self) -> u32 {
        self.turns.len() as u32 + 1
    }

    /// Open turn `n`. Turns are strictly sequential starting at 1 and a
    /// turn cannot be opened while another is in flight.
    pub fn start_turn(&mut self, n: u32, now: DateTime<Utc>) -> Result<(), MemoryError> {
        if let Some(open) = &self.open_turn {
            return Err(MemoryError::TurnAlreadyOpen(open.turn_number()));
        }
        let expected = self.next_turn_number();
        if n != expected {
            return Err(MemoryError::TurnOutOfOrder { expected, got: n });
        }
        self.open_turn = Some(TurnRecordBuilder::new(n, now));
        Ok(())
    }

    pub fn open_turn_mut(&mut self) -> Result<&mut TurnRecordBuilder, MemoryError> {
        self.open_turn.as_mut().ok_or(MemoryError::NoOpenTurn)
    }

    fn active_turn_number(&self) -> u32 {
        self.open_turn.as_ref().map(TurnRecordBuilder::turn_number).unwrap_or_else(|| {
            self.next_turn_number()
        })
    }

    /// Commit one fact. Governance is consulted first; a rejected write
    /// leaves `facts` untouched and leaves an audit entry in the tier
    /// trace. Information is never silently dropped.
    pub fn commit_fact(
        &mut self,
        governance: &GovernanceEngine,
        proposed: ProposedFact,
    ) -> Result<FactWrite, FactRejection> {
        let turn = self.active_turn_number();
        if let Err(rejection) =
            governance.can_commit_fact(self, &proposed.field, proposed.source, proposed.confidence)
        {
            let mut entry = TraceEntry::new(
                turn,
                TraceOutcome::FactRejected,
                format!(
                    "{} from {}: {}",
                    proposed.field.as_str(),
                    proposed.source.as_str(),
                    rejection.code()
                ),
            );
            entry.score = proposed.confidence;
            self.tier_trace.push(entry);
            return Err(rejection);
        }

        let record = FactRecord {
            value: proposed.value,
            source: proposed.source,
            confidence: proposed.confidence,
            committed_at_turn: turn,
        };
        let write = if self.facts.insert(proposed.field.clone(), record).is_some() {
            FactWrite::Updated
        } else {
            FactWrite::Added
        };

        let field_name = proposed.field.as_str();
        self.capture.must.mark_captured(field_name);
        self.capture.should.mark_captured(field_name);
        self.capture.nice.mark_captured(field_name);

        if let Some(open) = self.open_turn.as_mut() {
            match write {
                FactWrite::Added => open.delta.facts_added.push(proposed.field),
                FactWrite::Updated => open.delta.facts_updated.push(proposed.field),
            }
        }
        Ok(write)
    }

    /// Table-driven phase transition; the reason is recorded with the turn
    /// delta for audit.
    pub fn transition_phase(
        &mut self,
        to: CallPhase,
        reason: impl Into<String>,
    ) -> Result<(), MemoryError> {
        let from = self.phase;
        if !from.can_transition_to(to) {
            return Err(MemoryError::InvalidPhaseTransition { from, to });
        }
        self.phase = to;
        if let Some(open) = self.open_turn.as_mut() {
            open.delta.phase_transition = Some(PhaseChange { from, to, reason: reason.into() });
        }
        Ok(())
    }

    /// Finalize the open turn into an immutable record. Capture stall
    /// counters advance here: a tier that saw no successful write this
    /// turn ticks up, a tier that did resets to zero.
    pub fn commit_turn(
        &mut self,
        response_text: impl Into<String>,
        latency_ms: u64,
    ) -> Result<&TurnRecord, MemoryError> {
        let builder = self.open_turn.take().ok_or(MemoryError::NoOpenTurn)?;
        let record = builder.finalize(response_text.into(), latency_ms)?;

        let written = |tier: &CaptureTier| {
            record
                .delta
                .facts_added
                .iter()
                .chain(&record.delta.facts_updated)
                .any(|field| tier.contains(field.as_str()))
        };
        if written(&self.capture.must) {
            self.capture.must.turns_without_progress = 0;
        } else {
            self.capture.must.turns_without_progress += 1;
        }
        if written(&self.capture.should) {
            self.capture.should.turns_without_progress = 0;
        } else {
            self.capture.should.turns_without_progress += 1;
        }

        self.turns.push(record);
        Ok(self.turns.last().expect("turn was just pushed"))
    }

    pub fn push_trace(&mut self, entry: TraceEntry) {
        self.tier_trace.push(entry);
    }

    pub fn record_consent(&mut self, turn: u32, lock_after_consent: bool) {
        if self.booking.consent_given_at_turn.is_none() {
            self.booking.consent_given_at_turn = Some(turn);
        }
        if lock_after_consent {
            self.booking.locked = true;
        }
    }

    pub fn set_appointment(&mut self, appointment_id: AppointmentId) {
        self.booking.appointment_id = Some(appointment_id);
        self.outcome_hint = Some(CallOutcome::BookingCreated);
    }

    pub fn set_outcome_hint(&mut self, outcome: CallOutcome) {
        // A created booking is the strongest outcome; never downgrade it.
        if self.outcome_hint != Some(CallOutcome::BookingCreated) {
            self.outcome_hint = Some(outcome);
        }
    }

    pub fn must_complete(&self) -> bool {
        self.capture.must.all_captured()
    }

    pub fn fact_value(&self, field: &str) -> Option<&str> {
        self.facts.get(&FieldId::new(field)).map(|record| record.value.as_str())
    }

    /// Trace entries recorded for one turn, in append order.
    pub fn trace_for_turn(&self, turn: u32) -> Vec<TraceEntry> {
        self.tier_trace.iter().filter(|entry| entry.turn == turn).cloned().collect()
    }

    /// One-line-per-fact summary used to bound the generation prompt.
    pub fn fact_summary(&self) -> String {
        self.facts
            .iter()
            .map(|(field, record)| format!("{}: {}", field.as_str(), record.value))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use crate::domain::call::{CallId, CallPhase, CompanyId};
    use crate::domain::facts::{FactSource, ProposedFact};
    use crate::domain::turn::{CallerInput, HandlerChoice, HandlerKind};
    use crate::governance::{GovernanceConfig, GovernanceEngine};
    use crate::routing::TraceOutcome;

    use super::{ConversationMemory, FactWrite, MemoryError};

    fn memory() -> ConversationMemory {
        ConversationMemory::new(
            CallId("CA-7".to_string()),
            CompanyId("co-1".to_string()),
            None,
            &GovernanceConfig::default().capture,
            Utc::now(),
        )
    }

    fn open_turn(memory: &mut ConversationMemory, n: u32) {
        memory.start_turn(n, Utc::now()).expect("turn should open");
        let builder = memory.open_turn_mut().expect("turn is open");
        builder.set_caller_input(CallerInput::from_raw("hello", 1.0));
        builder.set_routing(HandlerChoice::new(HandlerKind::Llm));
    }

    #[test]
    fn turns_must_be_sequential_from_one() {
        let mut memory = memory();
        let error = memory.start_turn(2, Utc::now()).expect_err("turn 2 before turn 1");
        assert_eq!(error, MemoryError::TurnOutOfOrder { expected: 1, got: 2 });

        open_turn(&mut memory, 1);
        memory.commit_turn("hi there", 12).expect("commit turn 1");
        assert_eq!(memory.next_turn_number(), 2);
    }

    #[test]
    fn a_committed_turn_cannot_be_reopened() {
        let mut memory = memory();
        open_turn(&mut memory, 1);
        memory.commit_turn("response", 5).expect("commit");

        let error = memory.start_turn(1, Utc::now()).expect_err("turn 1 is write-once");
        assert_eq!(error, MemoryError::TurnOutOfOrder { expected: 2, got: 1 });
    }

    #[test]
    fn committing_without_an_open_turn_fails() {
        let mut memory = memory();
        assert_eq!(memory.commit_turn("x", 1).unwrap_err(), MemoryError::NoOpenTurn);
    }

    #[test]
    fn rejected_fact_leaves_facts_unchanged_and_traces_the_rejection() {
        let engine = GovernanceEngine::default();
        let mut memory = memory();
        open_turn(&mut memory, 1);

        let result = engine_commit(&engine, &mut memory, "favorite_color", 0.9);
        assert!(result.is_err());
        assert!(memory.facts.is_empty());
        assert_eq!(memory.tier_trace.len(), 1);
        assert_eq!(memory.tier_trace[0].outcome, TraceOutcome::FactRejected);
        assert!(memory.tier_trace[0].detail.contains("field_not_in_schema"));
    }

    #[test]
    fn accepted_fact_marks_capture_progress() {
        let engine = GovernanceEngine::default();
        let mut memory = memory();
        open_turn(&mut memory, 1);

        let write = engine_commit(&engine, &mut memory, "caller_name", 0.9).expect("accepted");
        assert_eq!(write, FactWrite::Added);
        assert!(memory.capture.must.is_captured("caller_name"));

        let write = engine_commit(&engine, &mut memory, "caller_name", 0.95).expect("overwrite");
        assert_eq!(write, FactWrite::Updated);
    }

    #[test]
    fn stall_counter_resets_on_must_progress_and_ticks_otherwise() {
        let engine = GovernanceEngine::default();
        let mut memory = memory();

        open_turn(&mut memory, 1);
        memory.commit_turn("no progress", 1).expect("commit");
        assert_eq!(memory.capture.must.turns_without_progress, 1);

        open_turn(&mut memory, 2);
        engine_commit(&engine, &mut memory, "caller_name", 0.9).expect("accepted");
        memory.commit_turn("captured a name", 1).expect("commit");
        assert_eq!(memory.capture.must.turns_without_progress, 0);
    }

    #[test]
    fn confirmation_requires_passing_through_booking() {
        let mut memory = memory();
        assert_eq!(
            memory.transition_phase(CallPhase::Confirmation, "skip ahead").unwrap_err(),
            MemoryError::InvalidPhaseTransition {
                from: CallPhase::Greeting,
                to: CallPhase::Confirmation
            }
        );

        memory.transition_phase(CallPhase::Discovery, "greeted").expect("greeting -> discovery");
        memory.transition_phase(CallPhase::Booking, "consent").expect("discovery -> booking");
        memory
            .transition_phase(CallPhase::Confirmation, "booked")
            .expect("booking -> confirmation");
    }

    #[test]
    fn phase_change_reason_lands_in_the_turn_delta() {
        let mut memory = memory();
        open_turn(&mut memory, 1);
        memory.transition_phase(CallPhase::Discovery, "greeting done").expect("transition");
        let record = memory.commit_turn("ok", 3).expect("commit").clone();

        let change = record.delta.phase_transition.expect("phase change recorded");
        assert_eq!(change.reason, "greeting done");
        assert_eq!(change.to, CallPhase::Discovery);
    }

    #[test]
    fn serde_round_trip_preserves_state() {
        let engine = GovernanceEngine::default();
        let mut memory = memory();
        open_turn(&mut memory, 1);
        engine_commit(&engine, &mut memory, "caller_name", 0.9).expect("accepted");
        memory.commit_turn("thanks", 9).expect("commit");

        let serialized = serde_json::to_string(&memory).expect("serialize");
        let restored: ConversationMemory =
            serde_json::from_str(&serialized).expect("deserialize");

        assert_eq!(restored.turns.len(), 1);
        assert_eq!(restored.fact_value("caller_name"), Some("Dana"));
        assert_eq!(restored.capture.must.turns_without_progress, 0);
        assert_eq!(restored.version, memory.version);
    }

    fn engine_commit(
        engine: &GovernanceEngine,
        memory: &mut ConversationMemory,
        field: &str,
        confidence: f32,
    ) -> Result<FactWrite, crate::governance::FactRejection> {
        memory.commit_fact(
            engine,
            ProposedFact::new(field, "Dana", FactSource::Extraction, confidence),
        )
    }
}
