use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use sqlx::Row;

use frontdesk_core::audit::{AuditCategory, AuditEvent, AuditOutcome};
use frontdesk_core::domain::call::{CallId, CompanyId};

use super::{AuditLogRepository, RepositoryError};
use crate::DbPool;

pub struct SqlAuditLogRepository {
    pool: DbPool,
}

impl SqlAuditLogRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn category_str(category: &AuditCategory) -> &'static str {
    match category {
        AuditCategory::Ingress => "ingress",
        AuditCategory::Turn => "turn",
        AuditCategory::Governance => "governance",
        AuditCategory::Routing => "routing",
        AuditCategory::Booking => "booking",
        AuditCategory::Persistence => "persistence",
        AuditCategory::Lifecycle => "lifecycle",
        AuditCategory::System => "system",
    }
}

fn parse_category(raw: &str) -> Result<AuditCategory, RepositoryError> {
    match raw {
        "ingress" => Ok(AuditCategory::Ingress),
        "turn" => Ok(AuditCategory::Turn),
        "governance" => Ok(AuditCategory::Governance),
        "routing" => Ok(AuditCategory::Routing),
        "booking" => Ok(AuditCategory::Booking),
        "persistence" => Ok(AuditCategory::Persistence),
        "lifecycle" => Ok(AuditCategory::Lifecycle),
        "system" => Ok(AuditCategory::System),
        other => Err(RepositoryError::Decode(format!("unknown audit category `{other}`"))),
    }
}

fn outcome_str(outcome: &AuditOutcome) -> &'static str {
    match outcome {
        AuditOutcome::Success => "success",
        AuditOutcome::Rejected => "rejected",
        AuditOutcome::Failed => "failed",
    }
}

fn parse_outcome(raw: &str) -> Result<AuditOutcome, RepositoryError> {
    match raw {
        "success" => Ok(AuditOutcome::Success),
        "rejected" => Ok(AuditOutcome::Rejected),
        "failed" => Ok(AuditOutcome::Failed),
        other => Err(RepositoryError::Decode(format!("unknown audit outcome `{other}`"))),
    }
}

#[async_trait::async_trait]
impl AuditLogRepository for SqlAuditLogRepository {
    async fn append(&self, event: AuditEvent) -> Result<(), RepositoryError> {
        let metadata = serde_json::to_string(&event.metadata)
            .map_err(|error| RepositoryError::Decode(error.to_string()))?;
        sqlx::query(
            "INSERT INTO audit_log
               (event_id, call_id, company_id, correlation_id, event_type,
                category, actor, outcome, metadata_json, occurred_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&event.event_id)
        .bind(event.call_id.as_ref().map(|id| id.0.as_str()))
        .bind(event.company_id.as_ref().map(|id| id.0.as_str()))
        .bind(&event.correlation_id)
        .bind(&event.event_type)
        .bind(category_str(&event.category))
        .bind(&event.actor)
        .bind(outcome_str(&event.outcome))
        .bind(metadata)
        .bind(event.occurred_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_recent(&self, limit: u32) -> Result<Vec<AuditEvent>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM audit_log ORDER BY occurred_at DESC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let metadata: BTreeMap<String, String> =
                    serde_json::from_str(&row.get::<String, _>("metadata_json"))
                        .map_err(|error| RepositoryError::Decode(error.to_string()))?;
                Ok(AuditEvent {
                    event_id: row.get::<String, _>("event_id"),
                    call_id: row.get::<Option<String>, _>("call_id").map(CallId),
                    company_id: row.get::<Option<String>, _>("company_id").map(CompanyId),
                    correlation_id: row.get::<String, _>("correlation_id"),
                    event_type: row.get::<String, _>("event_type"),
                    category: parse_category(&row.get::<String, _>("category"))?,
                    actor: row.get::<String, _>("actor"),
                    outcome: parse_outcome(&row.get::<String, _>("outcome"))?,
                    metadata,
                    occurred_at: row.get::<DateTime<Utc>, _>("occurred_at"),
                })
            })
            .collect()
    }
}
