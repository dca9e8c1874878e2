//! Per-turn control loop: RECEIVE → CLASSIFY → GOVERN → DECIDE → APPLY →
//! PERSIST → RESPOND. One instance serves every live call; per-call state
//! stays isolated in the session store, and a per-call lock plus the
//! store's version check serialize redelivered events.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{info, warn};

use frontdesk_core::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
use frontdesk_core::classify::{IntentGuess, IntentKind, TurnClassifier};
use frontdesk_core::domain::call::{CallId, CallPhase, CompanyId};
use frontdesk_core::domain::facts::FactSource;
use frontdesk_core::domain::summary::{CallOutcome, CallSummary};
use frontdesk_core::domain::turn::{CallerInput, ExtractionResult, HandlerKind};
use frontdesk_core::errors::{ApplicationError, DomainError};
use frontdesk_core::extract::FieldExtractor;
use frontdesk_core::governance::{GovernanceConfig, GovernanceEngine, OnMissingPolicy};
use frontdesk_core::memory::{ConversationMemory, MemoryError};
use frontdesk_core::routing::{
    SourceKind, TieredKnowledgeRouter, TraceEntry, TraceOutcome,
};
use frontdesk_store::repositories::{CallSummaryRepository, CallTranscript, TranscriptRepository};
use frontdesk_store::session::{SessionStore, SessionStoreError};

use crate::booking::{booking_ready, booking_request_from, BookingClient};
use crate::fallback::{emergency_decision, rule_based_decision};
use crate::llm::{parse_decision, DecisionAction, LlmClient, LlmDecision};
use crate::prompt::build_decision_prompt;

/// Read-only, company-scoped configuration lookup.
#[async_trait::async_trait]
pub trait CompanyDirectory: Send + Sync {
    async fn governance_for(
        &self,
        company_id: &CompanyId,
    ) -> anyhow::Result<Option<GovernanceConfig>>;

    async fn context_for(&self, company_id: &CompanyId) -> String;
}

#[derive(Default)]
pub struct StaticCompanyDirectory {
    configs: HashMap<String, GovernanceConfig>,
    contexts: HashMap<String, String>,
}

impl StaticCompanyDirectory {
    pub fn insert(
        &mut self,
        company_id: impl Into<String>,
        config: GovernanceConfig,
        context: impl Into<String>,
    ) {
        let company_id = company_id.into();
        self.configs.insert(company_id.clone(), config);
        self.contexts.insert(company_id, context.into());
    }
}

#[async_trait::async_trait]
impl CompanyDirectory for StaticCompanyDirectory {
    async fn governance_for(
        &self,
        company_id: &CompanyId,
    ) -> anyhow::Result<Option<GovernanceConfig>> {
        Ok(self.configs.get(&company_id.0).cloned())
    }

    async fn context_for(&self, company_id: &CompanyId) -> String {
        self.contexts
            .get(&company_id.0)
            .cloned()
            .unwrap_or_else(|| "A local service-trade business.".to_string())
    }
}

#[derive(Clone, Debug)]
pub struct EngineSettings {
    pub decision_timeout: std::time::Duration,
    pub save_retries: u32,
    pub save_backoff: std::time::Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            decision_timeout: std::time::Duration::from_secs(10),
            save_retries: 3,
            save_backoff: std::time::Duration::from_millis(50),
        }
    }
}

pub struct EngineDeps {
    pub sessions: Arc<dyn SessionStore>,
    pub directory: Arc<dyn CompanyDirectory>,
    pub router: Arc<TieredKnowledgeRouter>,
    pub llm: Arc<dyn LlmClient>,
    pub bookings: Arc<dyn BookingClient>,
    pub audit: Arc<dyn AuditSink>,
    pub summaries: Arc<dyn CallSummaryRepository>,
    pub transcripts: Arc<dyn TranscriptRepository>,
}

#[derive(Clone, Debug)]
pub struct TurnRequest {
    pub call_id: CallId,
    pub company_id: CompanyId,
    pub caller_utterance: String,
}

#[derive(Clone, Debug)]
pub struct TurnResponse {
    pub next_prompt_text: String,
    pub debug_trace: Vec<TraceEntry>,
}

pub struct OrchestrationEngine {
    deps: EngineDeps,
    classifier: TurnClassifier,
    extractor: FieldExtractor,
    settings: EngineSettings,
    call_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl OrchestrationEngine {
    pub fn new(deps: EngineDeps, settings: EngineSettings) -> Self {
        Self {
            deps,
            classifier: TurnClassifier::default(),
            extractor: FieldExtractor::new(),
            settings,
            call_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_classifier(mut self, classifier: TurnClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub async fn start_call(
        &self,
        call_id: CallId,
        company_id: CompanyId,
        caller_phone: Option<String>,
    ) -> Result<(), ApplicationError> {
        let lock = self.lock_for(&call_id).await;
        let _guard = lock.lock().await;

        match self.deps.sessions.load(&call_id).await {
            Ok(Some(_)) => {
                warn!(call_id = %call_id.0, "start received for a live call; ignoring duplicate");
                return Ok(());
            }
            Ok(None) => {}
            Err(error) => return Err(ApplicationError::Persistence(error.to_string())),
        }

        let governance = self.load_governance(&call_id, &company_id).await;
        let mut memory = ConversationMemory::new(
            call_id.clone(),
            company_id.clone(),
            caller_phone,
            &governance.config().capture,
            Utc::now(),
        );
        self.save_with_retry(&mut memory).await?;

        self.deps.audit.emit(AuditEvent::new(
            Some(call_id),
            Some(company_id),
            "call-start",
            "call.started",
            AuditCategory::Ingress,
            "orchestrator",
            AuditOutcome::Success,
        ));
        Ok(())
    }

    pub async fn process_turn(&self, request: TurnRequest) -> Result<TurnResponse, ApplicationError> {
        let started = Instant::now();
        let lock = self.lock_for(&request.call_id).await;
        let _guard = lock.lock().await;

        let governance = self.load_governance(&request.call_id, &request.company_id).await;

        // RECEIVE: absent or expired sessions are new calls, not errors.
        let mut memory = match self.deps.sessions.load(&request.call_id).await {
            Ok(Some(memory)) => memory,
            Ok(None) => {
                info!(call_id = %request.call_id.0, "no live session; starting fresh memory");
                ConversationMemory::new(
                    request.call_id.clone(),
                    request.company_id.clone(),
                    None,
                    &governance.config().capture,
                    Utc::now(),
                )
            }
            Err(error) => return Err(ApplicationError::Persistence(error.to_string())),
        };

        let turn = memory.next_turn_number();
        memory.start_turn(turn, Utc::now()).map_err(domain)?;

        // CLASSIFY: local signals plus deterministic field extraction.
        let input = CallerInput::from_raw(request.caller_utterance.clone(), 1.0);
        let guess = self.classifier.classify(&input.cleaned);
        let extraction = ExtractionResult { proposed: self.extractor.extract(&input) };
        {
            let builder = memory.open_turn_mut().map_err(domain)?;
            builder.set_caller_input(input.clone());
            builder.set_intent(guess.intent, guess.confidence);
            builder.set_extraction(extraction.clone());
        }

        // GOVERN
        let choice = governance.select_handler(&memory, &guess);
        let selected = choice.selected;
        memory.open_turn_mut().map_err(domain)?.set_routing(choice);

        if selected == HandlerKind::Booking && !memory.booking.consent_given() {
            memory.record_consent(turn, governance.config().consent.lock_after_consent);
            if memory.phase.can_transition_to(CallPhase::Booking) {
                let _ = memory.transition_phase(CallPhase::Booking, "booking consent recorded");
            }
        }

        // APPLY extracted fields. Under the booking lock the booking
        // handler owns extracted writes, so they carry its source.
        for mut fact in extraction.proposed.clone() {
            if selected == HandlerKind::Booking {
                fact.source = FactSource::BookingHandler;
            }
            if let Err(rejection) = memory.commit_fact(&governance, fact) {
                tracing::debug!(
                    call_id = %request.call_id.0,
                    turn,
                    code = rejection.code(),
                    "extracted fact rejected by governance"
                );
            }
        }

        let injection = governance.should_inject_capture(&memory);
        if injection.is_none()
            && governance.config().capture.on_missing == OnMissingPolicy::LogWarning
            && memory.capture.must.turns_without_progress
                >= governance.config().capture.max_stall_turns
        {
            if let Some(goal) = governance.next_missing_must(&memory) {
                warn!(call_id = %request.call_id.0, field = %goal.field,
                    "must capture goal stalled; policy is log-only");
            }
        }

        // DECIDE
        let mut booking_attempted = false;
        let mut decision = if let Some(goal) = injection
            .as_ref()
            .filter(|_| matches!(selected, HandlerKind::Knowledge | HandlerKind::Llm))
        {
            memory.push_trace(TraceEntry::new(
                turn,
                TraceOutcome::CaptureInjected,
                format!("capture stalled; forcing prompt for `{}`", goal.field),
            ));
            LlmDecision::say(
                goal.prompt.clone(),
                DecisionAction::AskField { field: goal.field.clone() },
            )
        } else {
            match selected {
                HandlerKind::Escalation => {
                    memory.set_outcome_hint(CallOutcome::Escalated);
                    self.deps.audit.emit(
                        AuditEvent::new(
                            Some(request.call_id.clone()),
                            Some(request.company_id.clone()),
                            format!("turn-{turn}"),
                            "turn.escalated",
                            AuditCategory::Governance,
                            "orchestrator",
                            AuditOutcome::Success,
                        )
                        .with_metadata("intent", guess.intent.as_str()),
                    );
                    if guess.signals.maybe_emergency {
                        emergency_decision()
                    } else {
                        LlmDecision::say(
                            "Let me get a team member on the line to help you right away.",
                            DecisionAction::Escalate { reason: "no handler available".to_string() },
                        )
                    }
                }
                HandlerKind::Scenario => rule_based_decision(&guess, None),
                HandlerKind::Booking => {
                    if booking_ready(&memory) {
                        LlmDecision::say(
                            "Perfect — let me get that on the schedule for you now.",
                            DecisionAction::Book,
                        )
                    } else if let Some(goal) = governance.next_missing_must(&memory) {
                        LlmDecision::say(
                            goal.prompt.clone(),
                            DecisionAction::AskField { field: goal.field },
                        )
                    } else {
                        LlmDecision::say(
                            "Let me double-check the details and get you scheduled.",
                            DecisionAction::Continue,
                        )
                    }
                }
                HandlerKind::Knowledge => {
                    self.knowledge_decision(&mut memory, &governance, &guess, &input, turn).await
                }
                HandlerKind::Llm => {
                    self.llm_decision(&memory, &request, &governance, &guess, turn).await
                }
            }
        };

        // APPLY decision facts. Handler-owned writes carry the handler's
        // source so the booking lock cannot orphan them.
        for mut fact in decision.facts.clone() {
            match selected {
                HandlerKind::Booking => fact.source = FactSource::BookingHandler,
                HandlerKind::Escalation => fact.source = FactSource::EscalationHandler,
                _ => {}
            }
            if let Err(rejection) = memory.commit_fact(&governance, fact) {
                tracing::debug!(turn, code = rejection.code(), "decision fact rejected");
            }
        }

        match decision.action.clone() {
            DecisionAction::Book => {
                booking_attempted = true;
                if let Some(utterance) = self.try_book(&mut memory, &governance, &request, turn).await
                {
                    decision.utterance = utterance;
                }
            }
            DecisionAction::Escalate { reason } => {
                memory.set_outcome_hint(CallOutcome::Escalated);
                self.deps.audit.emit(
                    AuditEvent::new(
                        Some(request.call_id.clone()),
                        Some(request.company_id.clone()),
                        format!("turn-{turn}"),
                        "call.escalated",
                        AuditCategory::Governance,
                        "orchestrator",
                        AuditOutcome::Success,
                    )
                    .with_metadata("reason", reason),
                );
            }
            DecisionAction::Close => {
                let outcome = if guess.signals.wrong_number {
                    CallOutcome::WrongNumber
                } else if guess.signals.spam {
                    CallOutcome::Spam
                } else {
                    CallOutcome::InfoProvided
                };
                memory.set_outcome_hint(outcome);
                if memory.phase.can_transition_to(CallPhase::Closing) {
                    let _ = memory.transition_phase(CallPhase::Closing, "call closed by decision");
                }
            }
            DecisionAction::Continue | DecisionAction::AskField { .. } => {}
        }

        // Booking readiness is recomputed after every write; a turn that
        // completes the must set triggers booking without another prompt.
        if !booking_attempted
            && memory.booking.consent_given()
            && memory.booking.appointment_id.is_none()
            && !matches!(decision.action, DecisionAction::Close)
            && booking_ready(&memory)
        {
            if let Some(utterance) = self.try_book(&mut memory, &governance, &request, turn).await {
                decision.utterance = utterance;
            }
        }

        if memory.phase == CallPhase::Greeting
            && !matches!(decision.action, DecisionAction::Close)
        {
            let _ = memory.transition_phase(CallPhase::Discovery, "first exchange complete");
        }

        // PERSIST
        let latency_ms = started.elapsed().as_millis() as u64;
        memory.commit_turn(decision.utterance.clone(), latency_ms).map_err(domain)?;
        self.save_with_retry(&mut memory).await?;

        // RESPOND
        Ok(TurnResponse {
            next_prompt_text: decision.utterance,
            debug_trace: memory.trace_for_turn(turn),
        })
    }

    pub async fn end_call(
        &self,
        call_id: &CallId,
        ended_at: DateTime<Utc>,
    ) -> Result<CallSummary, ApplicationError> {
        let lock = self.lock_for(call_id).await;
        let _guard = lock.lock().await;

        let memory = match self.deps.sessions.load(call_id).await {
            Ok(Some(memory)) => memory,
            Ok(None) => {
                return Err(ApplicationError::Domain(DomainError::InvariantViolation(format!(
                    "no live session for call {}",
                    call_id.0
                ))))
            }
            Err(error) => return Err(ApplicationError::Persistence(error.to_string())),
        };

        let summary = summarize(&memory, ended_at);

        let turns_json = serde_json::to_string(&memory.turns)
            .map_err(|error| ApplicationError::Persistence(error.to_string()))?;
        self.deps
            .transcripts
            .save(CallTranscript {
                call_id: call_id.clone(),
                company_id: memory.company_id.clone(),
                ended_at,
                turn_count: memory.turns.len() as u32,
                turns_json: Some(turns_json),
                cold_ref: None,
                moved_to_cold_at: None,
            })
            .await
            .map_err(|error| ApplicationError::Persistence(error.to_string()))?;
        self.deps
            .summaries
            .save(summary.clone())
            .await
            .map_err(|error| ApplicationError::Persistence(error.to_string()))?;

        self.deps.audit.emit(
            AuditEvent::new(
                Some(call_id.clone()),
                Some(memory.company_id.clone()),
                "call-end",
                "call.ended",
                AuditCategory::Ingress,
                "orchestrator",
                AuditOutcome::Success,
            )
            .with_metadata("outcome", summary.outcome.as_str())
            .with_metadata("turns", summary.turn_count.to_string()),
        );

        let _ = self.deps.sessions.remove(call_id).await;
        Ok(summary)
    }

    async fn knowledge_decision(
        &self,
        memory: &mut ConversationMemory,
        governance: &GovernanceEngine,
        guess: &IntentGuess,
        input: &CallerInput,
        turn: u32,
    ) -> LlmDecision {
        let outcome = self
            .deps
            .router
            .route(&input.cleaned, &governance.config().router.priorities, turn)
            .await;
        for entry in outcome.attempts {
            memory.push_trace(entry);
        }
        if outcome.answer.matched {
            LlmDecision::say(outcome.answer.text, DecisionAction::Continue)
        } else {
            rule_based_decision(guess, governance.next_missing_must(memory).as_ref())
        }
    }

    /// Generation call bounded by the configured timeout; any failure or
    /// unparseable payload degrades to the rule-based path. The turn
    /// always completes.
    async fn llm_decision(
        &self,
        memory: &ConversationMemory,
        request: &TurnRequest,
        governance: &GovernanceEngine,
        guess: &IntentGuess,
        turn: u32,
    ) -> LlmDecision {
        let company_context = self.deps.directory.context_for(&request.company_id).await;
        let prompt = build_decision_prompt(memory, &company_context, None);

        let raw = match tokio::time::timeout(
            self.settings.decision_timeout,
            self.deps.llm.complete(&prompt),
        )
        .await
        {
            Ok(Ok(raw)) => raw,
            Ok(Err(error)) => {
                warn!(turn, %error, "generation call failed; using rule-based fallback");
                return rule_based_decision(guess, governance.next_missing_must(memory).as_ref());
            }
            Err(_) => {
                warn!(turn, "generation call timed out; using rule-based fallback");
                return rule_based_decision(guess, governance.next_missing_must(memory).as_ref());
            }
        };

        match parse_decision(&raw) {
            Ok(decision) => decision,
            Err(error) => {
                warn!(turn, %error, "generation output unparseable; using rule-based fallback");
                self.deps.audit.emit(
                    AuditEvent::new(
                        Some(request.call_id.clone()),
                        Some(request.company_id.clone()),
                        format!("turn-{turn}"),
                        "generation.parse_failed",
                        AuditCategory::Turn,
                        "orchestrator",
                        AuditOutcome::Failed,
                    )
                    .with_metadata("error", error.to_string()),
                );
                rule_based_decision(guess, governance.next_missing_must(memory).as_ref())
            }
        }
    }

    /// One booking attempt per turn. Failure is surfaced as an escalation
    /// with the reason in the trace, never silently retried.
    async fn try_book(
        &self,
        memory: &mut ConversationMemory,
        governance: &GovernanceEngine,
        request: &TurnRequest,
        turn: u32,
    ) -> Option<String> {
        if !memory.booking.consent_given() {
            memory.record_consent(turn, governance.config().consent.lock_after_consent);
        }
        let booking_request = booking_request_from(memory)?;

        match self.deps.bookings.create_appointment(&booking_request).await {
            Ok(appointment_id) => {
                memory.set_appointment(appointment_id.clone());
                if memory.phase.can_transition_to(CallPhase::Confirmation) {
                    let _ = memory.transition_phase(CallPhase::Confirmation, "appointment created");
                }
                self.deps.audit.emit(
                    AuditEvent::new(
                        Some(request.call_id.clone()),
                        Some(request.company_id.clone()),
                        format!("turn-{turn}"),
                        "booking.created",
                        AuditCategory::Booking,
                        "orchestrator",
                        AuditOutcome::Success,
                    )
                    .with_metadata("appointment_id", appointment_id.0.clone()),
                );
                Some(format!(
                    "You're all set — your confirmation number is {}. We'll see you {}!",
                    appointment_id.0, booking_request.time_preference
                ))
            }
            Err(error) => {
                memory.push_trace(TraceEntry::new(
                    turn,
                    TraceOutcome::BookingFailed,
                    error.to_string(),
                ));
                memory.set_outcome_hint(CallOutcome::Escalated);
                self.deps.audit.emit(
                    AuditEvent::new(
                        Some(request.call_id.clone()),
                        Some(request.company_id.clone()),
                        format!("turn-{turn}"),
                        "booking.failed",
                        AuditCategory::Booking,
                        "orchestrator",
                        AuditOutcome::Failed,
                    )
                    .with_metadata("error", error.to_string()),
                );
                Some(
                    ApplicationError::BookingCreation(error.to_string())
                        .caller_utterance()
                        .to_string(),
                )
            }
        }
    }

    /// Missing or invalid company config is fatal for that call's custom
    /// flow only: it is audited and the built-in default flow takes over.
    async fn load_governance(&self, call_id: &CallId, company_id: &CompanyId) -> GovernanceEngine {
        match self.deps.directory.governance_for(company_id).await {
            Ok(Some(config)) => GovernanceEngine::new(config),
            Ok(None) => {
                warn!(company_id = %company_id.0, "no governance config; using default flow");
                self.audit_config_fallback(call_id, company_id, "config missing");
                GovernanceEngine::default()
            }
            Err(error) => {
                warn!(company_id = %company_id.0, %error, "governance config load failed; using default flow");
                self.audit_config_fallback(call_id, company_id, &error.to_string());
                GovernanceEngine::default()
            }
        }
    }

    fn audit_config_fallback(&self, call_id: &CallId, company_id: &CompanyId, detail: &str) {
        self.deps.audit.emit(
            AuditEvent::new(
                Some(call_id.clone()),
                Some(company_id.clone()),
                "config-load",
                "governance.default_flow_fallback",
                AuditCategory::Governance,
                "orchestrator",
                AuditOutcome::Failed,
            )
            .with_metadata("detail", detail),
        );
    }

    /// Save with bounded retry/backoff. The session store is the one hard
    /// dependency: exhausting retries fails the turn. Version conflicts
    /// are not retried; the other pass already won.
    async fn save_with_retry(
        &self,
        memory: &mut ConversationMemory,
    ) -> Result<(), ApplicationError> {
        let mut attempt = 0u32;
        loop {
            match self.deps.sessions.save(memory).await {
                Ok(()) => return Ok(()),
                Err(conflict @ SessionStoreError::VersionConflict { .. }) => {
                    return Err(ApplicationError::Persistence(conflict.to_string()));
                }
                Err(error) if attempt < self.settings.save_retries => {
                    attempt += 1;
                    let backoff = self.settings.save_backoff * 2u32.saturating_pow(attempt - 1);
                    warn!(%error, attempt, "session save failed; backing off before retry");
                    tokio::time::sleep(backoff).await;
                }
                Err(error) => {
                    self.deps.audit.emit(AuditEvent::new(
                        Some(memory.call_id.clone()),
                        Some(memory.company_id.clone()),
                        "persist",
                        "session.save_exhausted",
                        AuditCategory::Persistence,
                        "orchestrator",
                        AuditOutcome::Failed,
                    ));
                    return Err(ApplicationError::Persistence(error.to_string()));
                }
            }
        }
    }

    async fn lock_for(&self, call_id: &CallId) -> Arc<Mutex<()>> {
        let mut locks = self.call_locks.lock().await;
        locks.entry(call_id.0.clone()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }
}

fn domain(error: MemoryError) -> ApplicationError {
    ApplicationError::Domain(DomainError::Memory(error))
}

/// Derive the durable summary from final memory state.
pub fn summarize(memory: &ConversationMemory, ended_at: DateTime<Utc>) -> CallSummary {
    let outcome = memory.outcome_hint.unwrap_or(if memory.turns.is_empty() {
        CallOutcome::Abandoned
    } else {
        CallOutcome::InfoProvided
    });

    let intent = memory
        .turns
        .iter()
        .rev()
        .map(|turn| turn.intent)
        .find(|intent| *intent != IntentKind::Unknown)
        .unwrap_or(IntentKind::Unknown);

    let tier_used: Option<SourceKind> = memory
        .tier_trace
        .iter()
        .rev()
        .find(|entry| entry.outcome == TraceOutcome::Selected)
        .and_then(|entry| entry.source);

    CallSummary {
        call_id: memory.call_id.clone(),
        company_id: memory.company_id.clone(),
        caller_phone: memory.caller_phone.clone(),
        outcome,
        intent,
        tier_used,
        appointment_id: memory.booking.appointment_id.clone(),
        turn_count: memory.turns.len() as u32,
        facts_captured: memory.facts.len() as u32,
        started_at: memory.started_at,
        ended_at,
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use frontdesk_core::domain::call::{CallId, CompanyId};
    use frontdesk_core::domain::summary::CallOutcome;
    use frontdesk_core::governance::GovernanceConfig;
    use frontdesk_core::memory::ConversationMemory;

    use super::summarize;

    #[test]
    fn empty_call_summarizes_as_abandoned() {
        let memory = ConversationMemory::new(
            CallId("CA-1".to_string()),
            CompanyId("co-1".to_string()),
            None,
            &GovernanceConfig::default().capture,
            Utc::now(),
        );
        let summary = summarize(&memory, Utc::now());
        assert_eq!(summary.outcome, CallOutcome::Abandoned);
        assert_eq!(summary.turn_count, 0);
    }
}
