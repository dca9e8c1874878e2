pub mod connection;
pub mod migrations;
pub mod repositories;
pub mod session;

pub use connection::{connect, connect_with_settings, DbPool};
pub use repositories::{
    AuditLogRepository, BehavioralEvent, BehavioralEventRepository, CallSummaryRepository,
    CallTranscript, ColdObjectRef, CustomerRecord, CustomerRepository, DailyRollup,
    RepositoryError, RollupCounts, RollupRepository, TranscriptRepository,
};
pub use session::{InMemorySessionStore, SessionStore, SessionStoreError};
