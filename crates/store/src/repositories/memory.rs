//! In-memory repository implementations used on critical-path tests and
//! by the lifecycle jobs' unit tests.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::RwLock;

use frontdesk_core::audit::AuditEvent;
use frontdesk_core::domain::call::{CallId, CompanyId};
use frontdesk_core::domain::summary::CallSummary;

use super::{
    AuditLogRepository, BehavioralEvent, BehavioralEventRepository, CallSummaryRepository,
    CallTranscript, ColdObjectRef, CustomerRecord, CustomerRepository, DailyRollup,
    RepositoryError, RollupRepository, TranscriptRepository,
};

#[derive(Default)]
pub struct InMemoryCallSummaryRepository {
    summaries: RwLock<HashMap<String, CallSummary>>,
}

#[async_trait::async_trait]
impl CallSummaryRepository for InMemoryCallSummaryRepository {
    async fn save(&self, summary: CallSummary) -> Result<(), RepositoryError> {
        let mut summaries = self.summaries.write().await;
        summaries.insert(summary.call_id.0.clone(), summary);
        Ok(())
    }

    async fn find_by_call(&self, call_id: &CallId) -> Result<Option<CallSummary>, RepositoryError> {
        let summaries = self.summaries.read().await;
        Ok(summaries.get(&call_id.0).cloned())
    }

    async fn list_for_date(&self, date: NaiveDate) -> Result<Vec<CallSummary>, RepositoryError> {
        let summaries = self.summaries.read().await;
        Ok(summaries
            .values()
            .filter(|summary| summary.started_at.date_naive() == date)
            .cloned()
            .collect())
    }

    async fn dates_with_calls_since(
        &self,
        since: NaiveDate,
    ) -> Result<Vec<NaiveDate>, RepositoryError> {
        let summaries = self.summaries.read().await;
        let mut dates = summaries
            .values()
            .map(|summary| summary.started_at.date_naive())
            .filter(|date| *date >= since)
            .collect::<Vec<_>>();
        dates.sort();
        dates.dedup();
        Ok(dates)
    }

    async fn count_ended_before(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let summaries = self.summaries.read().await;
        Ok(summaries.values().filter(|summary| summary.ended_at < cutoff).count() as u64)
    }

    async fn delete_ended_before(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let mut summaries = self.summaries.write().await;
        let before = summaries.len();
        summaries.retain(|_, summary| summary.ended_at >= cutoff);
        Ok((before - summaries.len()) as u64)
    }
}

#[derive(Default)]
pub struct InMemoryTranscriptRepository {
    transcripts: RwLock<HashMap<String, CallTranscript>>,
}

#[async_trait::async_trait]
impl TranscriptRepository for InMemoryTranscriptRepository {
    async fn save(&self, transcript: CallTranscript) -> Result<(), RepositoryError> {
        let mut transcripts = self.transcripts.write().await;
        transcripts.insert(transcript.call_id.0.clone(), transcript);
        Ok(())
    }

    async fn find_by_call(
        &self,
        call_id: &CallId,
    ) -> Result<Option<CallTranscript>, RepositoryError> {
        let transcripts = self.transcripts.read().await;
        Ok(transcripts.get(&call_id.0).cloned())
    }

    async fn list_hot_ended_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<CallTranscript>, RepositoryError> {
        let transcripts = self.transcripts.read().await;
        Ok(transcripts
            .values()
            .filter(|transcript| transcript.is_hot() && transcript.ended_at < cutoff)
            .cloned()
            .collect())
    }

    async fn confirm_cold_migration(
        &self,
        call_id: &CallId,
        cold_ref: ColdObjectRef,
        moved_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut transcripts = self.transcripts.write().await;
        if let Some(transcript) = transcripts.get_mut(&call_id.0) {
            transcript.turns_json = None;
            transcript.cold_ref = Some(cold_ref);
            transcript.moved_to_cold_at = Some(moved_at);
        }
        Ok(())
    }

    async fn count_ended_before(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let transcripts = self.transcripts.read().await;
        Ok(transcripts.values().filter(|transcript| transcript.ended_at < cutoff).count() as u64)
    }

    async fn delete_ended_before(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let mut transcripts = self.transcripts.write().await;
        let before = transcripts.len();
        transcripts.retain(|_, transcript| transcript.ended_at >= cutoff);
        Ok((before - transcripts.len()) as u64)
    }
}

#[derive(Default)]
pub struct InMemoryRollupRepository {
    rollups: RwLock<HashMap<(String, NaiveDate), DailyRollup>>,
}

#[async_trait::async_trait]
impl RollupRepository for InMemoryRollupRepository {
    async fn upsert(&self, rollup: DailyRollup) -> Result<(), RepositoryError> {
        let mut rollups = self.rollups.write().await;
        rollups.insert((rollup.company_id.0.clone(), rollup.date), rollup);
        Ok(())
    }

    async fn find(
        &self,
        company_id: &CompanyId,
        date: NaiveDate,
    ) -> Result<Option<DailyRollup>, RepositoryError> {
        let rollups = self.rollups.read().await;
        Ok(rollups.get(&(company_id.0.clone(), date)).cloned())
    }

    async fn dates_with_rollups_since(
        &self,
        since: NaiveDate,
    ) -> Result<Vec<NaiveDate>, RepositoryError> {
        let rollups = self.rollups.read().await;
        let mut dates = rollups
            .keys()
            .map(|(_, date)| *date)
            .filter(|date| *date >= since)
            .collect::<Vec<_>>();
        dates.sort();
        dates.dedup();
        Ok(dates)
    }
}

#[derive(Default)]
pub struct InMemoryAuditLogRepository {
    events: RwLock<Vec<AuditEvent>>,
}

#[async_trait::async_trait]
impl AuditLogRepository for InMemoryAuditLogRepository {
    async fn append(&self, event: AuditEvent) -> Result<(), RepositoryError> {
        self.events.write().await.push(event);
        Ok(())
    }

    async fn list_recent(&self, limit: u32) -> Result<Vec<AuditEvent>, RepositoryError> {
        let events = self.events.read().await;
        Ok(events.iter().rev().take(limit as usize).cloned().collect())
    }
}

#[derive(Default)]
pub struct InMemoryCustomerRepository {
    customers: RwLock<HashMap<String, CustomerRecord>>,
}

#[async_trait::async_trait]
impl CustomerRepository for InMemoryCustomerRepository {
    async fn save(&self, record: CustomerRecord) -> Result<(), RepositoryError> {
        let mut customers = self.customers.write().await;
        customers.insert(record.id.clone(), record);
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<CustomerRecord>, RepositoryError> {
        let customers = self.customers.read().await;
        Ok(customers.get(id).cloned())
    }

    async fn count_dormant_before(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let customers = self.customers.read().await;
        Ok(customers
            .values()
            .filter(|record| record.last_call_at < cutoff && !record.anonymized)
            .count() as u64)
    }

    async fn anonymize_dormant_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        let mut customers = self.customers.write().await;
        let mut affected = 0;
        for record in customers.values_mut() {
            if record.last_call_at < cutoff && !record.anonymized {
                record.name = None;
                record.phone = None;
                record.address = None;
                record.notes = None;
                record.anonymized = true;
                affected += 1;
            }
        }
        Ok(affected)
    }
}

#[derive(Default)]
pub struct InMemoryBehavioralEventRepository {
    events: RwLock<Vec<BehavioralEvent>>,
}

#[async_trait::async_trait]
impl BehavioralEventRepository for InMemoryBehavioralEventRepository {
    async fn append(&self, event: BehavioralEvent) -> Result<(), RepositoryError> {
        self.events.write().await.push(event);
        Ok(())
    }

    async fn count_occurred_before(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let events = self.events.read().await;
        Ok(events.iter().filter(|event| event.occurred_at < cutoff).count() as u64)
    }

    async fn delete_occurred_before(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let mut events = self.events.write().await;
        let before = events.len();
        events.retain(|event| event.occurred_at >= cutoff);
        Ok((before - events.len()) as u64)
    }
}
