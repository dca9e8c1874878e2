pub mod booking;
pub mod fallback;
pub mod llm;
pub mod orchestrator;
pub mod prompt;
pub mod sources;
pub mod telemetry;

pub use booking::{booking_ready, booking_request_from, BookingClient, ScriptedBookingClient};
pub use fallback::rule_based_decision;
pub use llm::{
    parse_decision, DecisionAction, DecisionParseError, HttpLlmClient, LlmClient, LlmDecision,
    ScriptedLlmClient,
};
pub use orchestrator::{
    summarize, CompanyDirectory, EngineDeps, EngineSettings, OrchestrationEngine,
    StaticCompanyDirectory, TurnRequest, TurnResponse,
};
pub use prompt::{build_decision_prompt, MAX_CONTEXT_TURNS};
pub use sources::LlmFallbackSource;
pub use telemetry::init_logging;
