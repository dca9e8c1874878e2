pub mod audit;
pub mod classify;
pub mod config;
pub mod domain;
pub mod errors;
pub mod extract;
pub mod governance;
pub mod memory;
pub mod routing;

pub use classify::{ClassifierConfig, IntentGuess, IntentKind, IntentSignals, TurnClassifier};
pub use domain::booking::{AppointmentId, BookingRequest, BookingState};
pub use domain::call::{CallId, CallPhase, CompanyId, PhaseChange, TemplateId};
pub use domain::facts::{FactRecord, FactSource, FieldId, ProposedFact};
pub use domain::summary::{CallOutcome, CallSummary};
pub use domain::turn::{CallerInput, HandlerChoice, HandlerKind, TurnDelta, TurnRecord};
pub use errors::{ApplicationError, DomainError};
pub use extract::FieldExtractor;
pub use governance::{
    CaptureGoal, FactRejection, GovernanceConfig, GovernanceEngine, OnMissingPolicy,
};
pub use memory::{ConversationMemory, FactWrite, MemoryError, TurnRecordBuilder};
pub use routing::{
    KnowledgeSource, RouteOutcome, RoutedAnswer, ScoredResult, SourceKind, SourcePriority,
    SourceRegistry, TieredKnowledgeRouter, TraceEntry, TraceOutcome,
};
