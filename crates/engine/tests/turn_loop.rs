//! End-to-end turn-loop coverage with in-memory collaborators: scripted
//! generation, scripted booking, and the real governance/routing stack.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use frontdesk_core::audit::InMemoryAuditSink;
use frontdesk_core::domain::call::{CallId, CompanyId};
use frontdesk_core::domain::summary::CallOutcome;
use frontdesk_core::errors::ApplicationError;
use frontdesk_core::governance::GovernanceConfig;
use frontdesk_core::memory::ConversationMemory;
use frontdesk_core::routing::sources::{CompanyKbSource, KbEntry};
use frontdesk_core::routing::{SourceKind, SourceRegistry, TieredKnowledgeRouter, TraceOutcome};
use frontdesk_engine::{
    EngineDeps, EngineSettings, OrchestrationEngine, ScriptedBookingClient, ScriptedLlmClient,
    StaticCompanyDirectory, TurnRequest,
};
use frontdesk_store::repositories::{
    CallSummaryRepository, InMemoryCallSummaryRepository, InMemoryTranscriptRepository,
    TranscriptRepository,
};
use frontdesk_store::session::{InMemorySessionStore, SessionStore, SessionStoreError};

struct Harness {
    engine: OrchestrationEngine,
    sessions: Arc<InMemorySessionStore>,
    bookings: Arc<ScriptedBookingClient>,
    audit: InMemoryAuditSink,
    summaries: Arc<InMemoryCallSummaryRepository>,
    transcripts: Arc<InMemoryTranscriptRepository>,
}

fn harness() -> Harness {
    harness_with(Arc::new(InMemorySessionStore::new(64, Duration::from_secs(300))), 3)
}

fn harness_with(sessions: Arc<InMemorySessionStore>, save_retries: u32) -> Harness {
    let mut directory = StaticCompanyDirectory::default();
    directory.insert(
        "co-1",
        GovernanceConfig::default(),
        "Acme Plumbing & Heating. Open 7am to 6pm weekdays.",
    );

    let mut registry = SourceRegistry::default();
    registry.register(CompanyKbSource::new(vec![
        KbEntry::new(&["hours", "open"], "We're open 7am to 6pm, Monday through Friday."),
        KbEntry::new(&["service", "area"], "We cover the whole metro area."),
    ]));

    let bookings = Arc::new(ScriptedBookingClient::default());
    let audit = InMemoryAuditSink::default();
    let summaries = Arc::new(InMemoryCallSummaryRepository::default());
    let transcripts = Arc::new(InMemoryTranscriptRepository::default());

    let engine = OrchestrationEngine::new(
        EngineDeps {
            sessions: sessions.clone(),
            directory: Arc::new(directory),
            router: Arc::new(TieredKnowledgeRouter::new(registry)),
            llm: Arc::new(ScriptedLlmClient::default()),
            bookings: bookings.clone(),
            audit: Arc::new(audit.clone()),
            summaries: summaries.clone(),
            transcripts: transcripts.clone(),
        },
        EngineSettings {
            decision_timeout: Duration::from_millis(200),
            save_retries,
            save_backoff: Duration::from_millis(1),
        },
    );

    Harness { engine, sessions, bookings, audit, summaries, transcripts }
}

fn request(call_id: &str, utterance: &str) -> TurnRequest {
    TurnRequest {
        call_id: CallId(call_id.to_string()),
        company_id: CompanyId("co-1".to_string()),
        caller_utterance: utterance.to_string(),
    }
}

async fn memory_of(harness: &Harness, call_id: &str) -> ConversationMemory {
    harness
        .sessions
        .load(&CallId(call_id.to_string()))
        .await
        .expect("session store reachable")
        .expect("session present")
}

#[tokio::test]
async fn gas_smell_is_treated_as_an_emergency_not_a_greeting() {
    let harness = harness();
    let response = harness
        .engine
        .process_turn(request("CA-gas", "Hi, I smell gas in my basement"))
        .await
        .expect("turn completes");

    assert!(
        response.next_prompt_text.to_lowercase().contains("address"),
        "emergency prompt must go straight for the address: {}",
        response.next_prompt_text
    );

    let memory = memory_of(&harness, "CA-gas").await;
    assert_eq!(memory.fact_value("problem_urgency"), Some("emergency"));
    assert_eq!(memory.outcome_hint, Some(CallOutcome::Escalated));
}

#[tokio::test]
async fn wrong_number_closes_within_one_turn_without_booking() {
    let harness = harness();
    let response = harness
        .engine
        .process_turn(request("CA-wrong", "sorry, wrong number — who is this?"))
        .await
        .expect("turn completes");

    assert!(response.next_prompt_text.to_lowercase().contains("wrong number"));

    let summary = harness
        .engine
        .end_call(&CallId("CA-wrong".to_string()), Utc::now())
        .await
        .expect("call finalizes");
    assert_eq!(summary.outcome, CallOutcome::WrongNumber);
    assert_eq!(summary.turn_count, 1);
    assert!(harness.bookings.created().await.is_empty(), "no booking attempt may occur");
}

#[tokio::test]
async fn booking_triggers_only_after_all_must_fields_arrive() {
    let harness = harness();

    harness
        .engine
        .process_turn(request("CA-book", "My water heater is leaking everywhere"))
        .await
        .expect("turn 1 completes");

    let memory = memory_of(&harness, "CA-book").await;
    assert!(memory.capture.must.is_captured("problem_summary"));
    assert!(!memory.capture.must.all_captured(), "turn 1 alone must not complete the set");
    assert!(harness.bookings.created().await.is_empty(), "booking must not fire yet");

    let response = harness
        .engine
        .process_turn(request(
            "CA-book",
            "Yes, can you send someone tomorrow? My name is Dana Whitfield, \
             my number is 555-867-5309, and I'm at 1428 Elm Street.",
        ))
        .await
        .expect("turn 2 completes");

    let memory = memory_of(&harness, "CA-book").await;
    assert!(memory.capture.must.all_captured(), "turn 2 completes the must set");
    assert!(memory.booking.locked, "consent locks the call to the booking handler");

    let created = harness.bookings.created().await;
    assert_eq!(created.len(), 1, "booking fires exactly once");
    assert_eq!(created[0].caller_name, "Dana Whitfield");
    assert_eq!(created[0].callback_number, "(555) 867-5309");
    assert_eq!(created[0].service_address, "1428 Elm Street");
    assert!(response.next_prompt_text.contains("apt-0001"));

    let summary = harness
        .engine
        .end_call(&CallId("CA-book".to_string()), Utc::now())
        .await
        .expect("call finalizes");
    assert_eq!(summary.outcome, CallOutcome::BookingCreated);
    assert!(summary.appointment_id.is_some());
}

#[tokio::test]
async fn knowledge_question_is_answered_from_the_company_tier() {
    let harness = harness();
    let response = harness
        .engine
        .process_turn(request("CA-info", "what are your hours, are you open today?"))
        .await
        .expect("turn completes");

    assert!(response.next_prompt_text.contains("7am"));
    assert!(response
        .debug_trace
        .iter()
        .any(|entry| entry.outcome == TraceOutcome::Selected
            && entry.source == Some(SourceKind::CompanyKb)));

    let summary = harness
        .engine
        .end_call(&CallId("CA-info".to_string()), Utc::now())
        .await
        .expect("call finalizes");
    assert_eq!(summary.tier_used, Some(SourceKind::CompanyKb));
}

#[tokio::test]
async fn booking_failure_escalates_instead_of_retrying() {
    let harness = harness();
    harness.bookings.fail_next_with("scheduler is down").await;

    harness
        .engine
        .process_turn(request("CA-fail", "my furnace is broken, no heat at all"))
        .await
        .expect("turn 1 completes");
    let response = harness
        .engine
        .process_turn(request(
            "CA-fail",
            "Please book an appointment tomorrow. My name is Dana Whitfield, \
             number 555-867-5309, address 1428 Elm Street.",
        ))
        .await
        .expect("turn 2 completes");

    assert!(response.next_prompt_text.contains("call you right back"));
    assert!(response
        .debug_trace
        .iter()
        .any(|entry| entry.outcome == TraceOutcome::BookingFailed));
    assert!(harness.bookings.created().await.is_empty(), "failed attempt is not retried");

    let memory = memory_of(&harness, "CA-fail").await;
    assert_eq!(memory.outcome_hint, Some(CallOutcome::Escalated));

    let failures = harness
        .audit
        .events()
        .into_iter()
        .filter(|event| event.event_type == "booking.failed")
        .count();
    assert_eq!(failures, 1);
}

#[tokio::test]
async fn end_call_persists_summary_and_hot_transcript() {
    let harness = harness();
    harness
        .engine
        .process_turn(request("CA-end", "what are your hours?"))
        .await
        .expect("turn completes");
    harness
        .engine
        .end_call(&CallId("CA-end".to_string()), Utc::now())
        .await
        .expect("call finalizes");

    let summary = harness
        .summaries
        .find_by_call(&CallId("CA-end".to_string()))
        .await
        .expect("repo reachable")
        .expect("summary stored");
    assert_eq!(summary.turn_count, 1);

    let transcript = harness
        .transcripts
        .find_by_call(&CallId("CA-end".to_string()))
        .await
        .expect("repo reachable")
        .expect("transcript stored");
    assert!(transcript.is_hot());
    assert_eq!(transcript.turn_count, 1);

    // Session is evicted once the call is finalized.
    assert!(harness
        .sessions
        .load(&CallId("CA-end".to_string()))
        .await
        .expect("store reachable")
        .is_none());
}

struct FlakySessionStore {
    inner: InMemorySessionStore,
    failures_remaining: Mutex<u32>,
}

#[async_trait]
impl SessionStore for FlakySessionStore {
    async fn load(
        &self,
        call_id: &CallId,
    ) -> Result<Option<ConversationMemory>, SessionStoreError> {
        self.inner.load(call_id).await
    }

    async fn save(&self, memory: &mut ConversationMemory) -> Result<(), SessionStoreError> {
        let mut failures = self.failures_remaining.lock().await;
        if *failures > 0 {
            *failures -= 1;
            return Err(SessionStoreError::Unavailable("injected outage".to_string()));
        }
        self.inner.save(memory).await
    }

    async fn remove(&self, call_id: &CallId) -> Result<(), SessionStoreError> {
        self.inner.remove(call_id).await
    }
}

fn flaky_harness(failures: u32, save_retries: u32) -> Harness {
    let mut harness = harness_with(
        Arc::new(InMemorySessionStore::new(64, Duration::from_secs(300))),
        save_retries,
    );
    let flaky = Arc::new(FlakySessionStore {
        inner: InMemorySessionStore::new(64, Duration::from_secs(300)),
        failures_remaining: Mutex::new(failures),
    });

    let mut directory = StaticCompanyDirectory::default();
    directory.insert("co-1", GovernanceConfig::default(), "Acme Plumbing.");
    harness.engine = OrchestrationEngine::new(
        EngineDeps {
            sessions: flaky,
            directory: Arc::new(directory),
            router: Arc::new(TieredKnowledgeRouter::new(SourceRegistry::default())),
            llm: Arc::new(ScriptedLlmClient::default()),
            bookings: harness.bookings.clone(),
            audit: Arc::new(harness.audit.clone()),
            summaries: harness.summaries.clone(),
            transcripts: harness.transcripts.clone(),
        },
        EngineSettings {
            decision_timeout: Duration::from_millis(200),
            save_retries,
            save_backoff: Duration::from_millis(1),
        },
    );
    harness
}

#[tokio::test]
async fn transient_save_failures_are_retried_with_backoff() {
    let harness = flaky_harness(2, 3);
    let response = harness
        .engine
        .process_turn(request("CA-retry", "hello there"))
        .await
        .expect("turn completes after retries");
    assert!(!response.next_prompt_text.is_empty());
}

#[tokio::test]
async fn exhausted_save_retries_fail_the_turn_with_a_hold_message() {
    let harness = flaky_harness(10, 2);
    let error = harness
        .engine
        .process_turn(request("CA-dead", "hello there"))
        .await
        .expect_err("persistence outage must fail the turn");

    assert!(matches!(error, ApplicationError::Persistence(_)));
    assert!(error.caller_utterance().contains("hold"));
}
