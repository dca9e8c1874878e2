use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use frontdesk_core::classify::IntentKind;
use frontdesk_core::domain::call::{CallId, CompanyId};
use frontdesk_core::domain::summary::{CallOutcome, CallSummary};
use frontdesk_core::routing::SourceKind;

pub mod audit_log;
pub mod customer;
pub mod events;
pub mod memory;
pub mod rollup;
pub mod summary;
pub mod transcript;

pub use audit_log::SqlAuditLogRepository;
pub use customer::SqlCustomerRepository;
pub use events::SqlBehavioralEventRepository;
pub use memory::{
    InMemoryAuditLogRepository, InMemoryBehavioralEventRepository, InMemoryCallSummaryRepository,
    InMemoryCustomerRepository, InMemoryRollupRepository, InMemoryTranscriptRepository,
};
pub use rollup::SqlRollupRepository;
pub use summary::SqlCallSummaryRepository;
pub use transcript::SqlTranscriptRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

/// Reference to an archived transcript object in cold storage.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColdObjectRef {
    pub bucket: String,
    pub object_key: String,
}

/// Transcript row: hot turn-level detail until the archiver moves it to
/// cold storage, after which only the reference and turn count remain.
#[derive(Clone, Debug, PartialEq)]
pub struct CallTranscript {
    pub call_id: CallId,
    pub company_id: CompanyId,
    pub ended_at: DateTime<Utc>,
    pub turn_count: u32,
    pub turns_json: Option<String>,
    pub cold_ref: Option<ColdObjectRef>,
    pub moved_to_cold_at: Option<DateTime<Utc>>,
}

impl CallTranscript {
    pub fn is_hot(&self) -> bool {
        self.turns_json.is_some() && self.moved_to_cold_at.is_none()
    }
}

/// Pre-aggregated per-company stats for one day. Upserts are keyed by
/// (company_id, date) so reprocessing a day never double-counts.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RollupCounts {
    pub total_calls: u32,
    pub by_outcome: std::collections::BTreeMap<String, u32>,
    pub by_tier: std::collections::BTreeMap<String, u32>,
    pub by_intent: std::collections::BTreeMap<String, u32>,
    pub hourly: Vec<u32>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DailyRollup {
    pub company_id: CompanyId,
    pub date: NaiveDate,
    pub counts: RollupCounts,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CustomerRecord {
    pub id: String,
    pub company_id: CompanyId,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub notes: Option<String>,
    pub call_count: u32,
    pub last_call_at: DateTime<Utc>,
    pub anonymized: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct BehavioralEvent {
    pub id: String,
    pub call_id: CallId,
    pub company_id: CompanyId,
    pub kind: String,
    pub occurred_at: DateTime<Utc>,
}

#[async_trait]
pub trait CallSummaryRepository: Send + Sync {
    async fn save(&self, summary: CallSummary) -> Result<(), RepositoryError>;
    async fn find_by_call(&self, call_id: &CallId) -> Result<Option<CallSummary>, RepositoryError>;
    async fn list_for_date(&self, date: NaiveDate) -> Result<Vec<CallSummary>, RepositoryError>;
    async fn dates_with_calls_since(
        &self,
        since: NaiveDate,
    ) -> Result<Vec<NaiveDate>, RepositoryError>;
    async fn count_ended_before(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError>;
    async fn delete_ended_before(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError>;
}

#[async_trait]
pub trait TranscriptRepository: Send + Sync {
    async fn save(&self, transcript: CallTranscript) -> Result<(), RepositoryError>;
    async fn find_by_call(
        &self,
        call_id: &CallId,
    ) -> Result<Option<CallTranscript>, RepositoryError>;
    async fn list_hot_ended_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<CallTranscript>, RepositoryError>;
    /// Record the cold-storage reference and clear the hot turn detail in
    /// one step. Only called after upload success is confirmed.
    async fn confirm_cold_migration(
        &self,
        call_id: &CallId,
        cold_ref: ColdObjectRef,
        moved_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;
    async fn count_ended_before(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError>;
    async fn delete_ended_before(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError>;
}

#[async_trait]
pub trait RollupRepository: Send + Sync {
    async fn upsert(&self, rollup: DailyRollup) -> Result<(), RepositoryError>;
    async fn find(
        &self,
        company_id: &CompanyId,
        date: NaiveDate,
    ) -> Result<Option<DailyRollup>, RepositoryError>;
    async fn dates_with_rollups_since(
        &self,
        since: NaiveDate,
    ) -> Result<Vec<NaiveDate>, RepositoryError>;
}

#[async_trait]
pub trait AuditLogRepository: Send + Sync {
    async fn append(&self, event: frontdesk_core::audit::AuditEvent)
        -> Result<(), RepositoryError>;
    async fn list_recent(
        &self,
        limit: u32,
    ) -> Result<Vec<frontdesk_core::audit::AuditEvent>, RepositoryError>;
}

#[async_trait]
pub trait CustomerRepository: Send + Sync {
    async fn save(&self, record: CustomerRecord) -> Result<(), RepositoryError>;
    async fn find_by_id(&self, id: &str) -> Result<Option<CustomerRecord>, RepositoryError>;
    async fn count_dormant_before(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError>;
    /// Clear personally identifying fields in place, keeping the record
    /// (company, call counts) for aggregate analytics.
    async fn anonymize_dormant_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, RepositoryError>;
}

#[async_trait]
pub trait BehavioralEventRepository: Send + Sync {
    async fn append(&self, event: BehavioralEvent) -> Result<(), RepositoryError>;
    async fn count_occurred_before(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError>;
    async fn delete_occurred_before(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError>;
}

pub(crate) fn parse_outcome(raw: &str) -> Result<CallOutcome, RepositoryError> {
    match raw {
        "booking_created" => Ok(CallOutcome::BookingCreated),
        "escalated" => Ok(CallOutcome::Escalated),
        "info_provided" => Ok(CallOutcome::InfoProvided),
        "wrong_number" => Ok(CallOutcome::WrongNumber),
        "spam" => Ok(CallOutcome::Spam),
        "abandoned" => Ok(CallOutcome::Abandoned),
        other => Err(RepositoryError::Decode(format!("unknown call outcome `{other}`"))),
    }
}

pub(crate) fn parse_intent(raw: &str) -> Result<IntentKind, RepositoryError> {
    match raw {
        "emergency" => Ok(IntentKind::Emergency),
        "wrong_number" => Ok(IntentKind::WrongNumber),
        "spam" => Ok(IntentKind::Spam),
        "booking_request" => Ok(IntentKind::BookingRequest),
        "update_booking" => Ok(IntentKind::UpdateBooking),
        "billing" => Ok(IntentKind::Billing),
        "troubleshooting" => Ok(IntentKind::Troubleshooting),
        "info_request" => Ok(IntentKind::InfoRequest),
        "unknown" => Ok(IntentKind::Unknown),
        other => Err(RepositoryError::Decode(format!("unknown intent `{other}`"))),
    }
}

pub(crate) fn parse_source(raw: &str) -> Result<SourceKind, RepositoryError> {
    match raw {
        "company_kb" => Ok(SourceKind::CompanyKb),
        "trade_kb" => Ok(SourceKind::TradeKb),
        "templates" => Ok(SourceKind::Templates),
        "insights" => Ok(SourceKind::Insights),
        "semantic" => Ok(SourceKind::Semantic),
        "llm_fallback" => Ok(SourceKind::LlmFallback),
        other => Err(RepositoryError::Decode(format!("unknown source kind `{other}`"))),
    }
}
