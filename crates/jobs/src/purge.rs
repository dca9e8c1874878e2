//! Retention enforcement. Deletion cutoffs are derived from the
//! configured policy; a requested cutoff inside a retention window is
//! refused with a logged warning, never silently skipped. Dormant
//! customers are anonymized in place rather than deleted.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use frontdesk_core::audit::{AuditCategory, AuditEvent, AuditOutcome};
use frontdesk_core::config::RetentionConfig;
use frontdesk_store::repositories::{
    AuditLogRepository, BehavioralEventRepository, CallSummaryRepository, CustomerRepository,
    TranscriptRepository,
};

use crate::JobError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PurgeMode {
    DryRun,
    Live,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EntityReport {
    pub eligible: u64,
    pub removed: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PurgeReport {
    pub mode: PurgeMode,
    pub summaries: EntityReport,
    pub transcripts: EntityReport,
    pub behavioral_events: EntityReport,
    pub customers_eligible: u64,
    pub customers_anonymized: u64,
}

/// Explicit cutoff overrides; anything left `None` uses the policy
/// cutoff. Overrides newer than the policy allows are retention
/// violations.
#[derive(Clone, Copy, Debug, Default)]
pub struct PurgeCutoffs {
    pub summaries: Option<DateTime<Utc>>,
    pub transcripts: Option<DateTime<Utc>>,
    pub behavioral_events: Option<DateTime<Utc>>,
}

pub struct DataPurge {
    summaries: Arc<dyn CallSummaryRepository>,
    transcripts: Arc<dyn TranscriptRepository>,
    events: Arc<dyn BehavioralEventRepository>,
    customers: Arc<dyn CustomerRepository>,
    audit: Arc<dyn AuditLogRepository>,
    retention: RetentionConfig,
}

impl DataPurge {
    pub fn new(
        summaries: Arc<dyn CallSummaryRepository>,
        transcripts: Arc<dyn TranscriptRepository>,
        events: Arc<dyn BehavioralEventRepository>,
        customers: Arc<dyn CustomerRepository>,
        audit: Arc<dyn AuditLogRepository>,
        retention: RetentionConfig,
    ) -> Self {
        Self { summaries, transcripts, events, customers, audit, retention }
    }

    pub async fn run(&self, mode: PurgeMode, now: DateTime<Utc>) -> Result<PurgeReport, JobError> {
        self.run_with_cutoffs(mode, now, PurgeCutoffs::default()).await
    }

    pub async fn run_with_cutoffs(
        &self,
        mode: PurgeMode,
        now: DateTime<Utc>,
        overrides: PurgeCutoffs,
    ) -> Result<PurgeReport, JobError> {
        let summary_cutoff = self.resolve_cutoff(
            "call_summary",
            now,
            self.retention.summary_days,
            overrides.summaries,
        )?;
        let transcript_cutoff = self.resolve_cutoff(
            "call_transcript",
            now,
            self.retention.transcript_days,
            overrides.transcripts,
        )?;
        let event_cutoff = self.resolve_cutoff(
            "behavioral_event",
            now,
            self.retention.behavioral_event_days,
            overrides.behavioral_events,
        )?;
        let customer_cutoff = now - Duration::days(self.retention.customer_dormant_days as i64);

        let mut report = PurgeReport {
            mode,
            summaries: EntityReport {
                eligible: self.summaries.count_ended_before(summary_cutoff).await?,
                removed: 0,
            },
            transcripts: EntityReport {
                eligible: self.transcripts.count_ended_before(transcript_cutoff).await?,
                removed: 0,
            },
            behavioral_events: EntityReport {
                eligible: self.events.count_occurred_before(event_cutoff).await?,
                removed: 0,
            },
            customers_eligible: self.customers.count_dormant_before(customer_cutoff).await?,
            customers_anonymized: 0,
        };

        if mode == PurgeMode::DryRun {
            info!(
                summaries = report.summaries.eligible,
                transcripts = report.transcripts.eligible,
                events = report.behavioral_events.eligible,
                customers = report.customers_eligible,
                "purge dry run complete; nothing deleted"
            );
            return Ok(report);
        }

        report.summaries.removed = self.summaries.delete_ended_before(summary_cutoff).await?;
        report.transcripts.removed = self.transcripts.delete_ended_before(transcript_cutoff).await?;
        report.behavioral_events.removed =
            self.events.delete_occurred_before(event_cutoff).await?;
        report.customers_anonymized =
            self.customers.anonymize_dormant_before(customer_cutoff).await?;

        self.audit
            .append(
                AuditEvent::new(
                    None,
                    None,
                    "purge-run",
                    "retention.purge_completed",
                    AuditCategory::Lifecycle,
                    "data-purge",
                    AuditOutcome::Success,
                )
                .with_metadata("summaries_removed", report.summaries.removed.to_string())
                .with_metadata("transcripts_removed", report.transcripts.removed.to_string())
                .with_metadata("events_removed", report.behavioral_events.removed.to_string())
                .with_metadata("customers_anonymized", report.customers_anonymized.to_string()),
            )
            .await?;

        info!(
            summaries = report.summaries.removed,
            transcripts = report.transcripts.removed,
            events = report.behavioral_events.removed,
            customers = report.customers_anonymized,
            "purge live run complete"
        );
        Ok(report)
    }

    fn resolve_cutoff(
        &self,
        entity: &str,
        now: DateTime<Utc>,
        retention_days: u32,
        requested: Option<DateTime<Utc>>,
    ) -> Result<DateTime<Utc>, JobError> {
        let policy_cutoff = now - Duration::days(retention_days as i64);
        match requested {
            None => Ok(policy_cutoff),
            Some(cutoff) if cutoff <= policy_cutoff => Ok(cutoff),
            Some(cutoff) => {
                warn!(
                    entity,
                    requested = %cutoff,
                    policy = %policy_cutoff,
                    "refusing purge cutoff inside the retention window"
                );
                Err(JobError::RetentionViolation(format!(
                    "requested cutoff {cutoff} for {entity} is inside the {retention_days}-day retention window"
                )))
            }
        }
    }
}
