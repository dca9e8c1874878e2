use chrono::{DateTime, NaiveDate, Utc};
use sqlx::Row;

use frontdesk_core::domain::booking::AppointmentId;
use frontdesk_core::domain::call::{CallId, CompanyId};
use frontdesk_core::domain::summary::CallSummary;

use super::{parse_intent, parse_outcome, parse_source, CallSummaryRepository, RepositoryError};
use crate::DbPool;

pub struct SqlCallSummaryRepository {
    pool: DbPool,
}

impl SqlCallSummaryRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn summary_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<CallSummary, RepositoryError> {
    Ok(CallSummary {
        call_id: CallId(row.get::<String, _>("call_id")),
        company_id: CompanyId(row.get::<String, _>("company_id")),
        caller_phone: row.get::<Option<String>, _>("caller_phone"),
        outcome: parse_outcome(&row.get::<String, _>("outcome"))?,
        intent: parse_intent(&row.get::<String, _>("intent"))?,
        tier_used: row
            .get::<Option<String>, _>("tier_used")
            .as_deref()
            .map(parse_source)
            .transpose()?,
        appointment_id: row.get::<Option<String>, _>("appointment_id").map(AppointmentId),
        turn_count: row.get::<i64, _>("turn_count") as u32,
        facts_captured: row.get::<i64, _>("facts_captured") as u32,
        started_at: row.get::<DateTime<Utc>, _>("started_at"),
        ended_at: row.get::<DateTime<Utc>, _>("ended_at"),
    })
}

#[async_trait::async_trait]
impl CallSummaryRepository for SqlCallSummaryRepository {
    async fn save(&self, summary: CallSummary) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO call_summary
               (call_id, company_id, caller_phone, outcome, intent, tier_used,
                appointment_id, turn_count, facts_captured, started_at, ended_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(call_id) DO UPDATE SET
               outcome = excluded.outcome,
               intent = excluded.intent,
               tier_used = excluded.tier_used,
               appointment_id = excluded.appointment_id,
               turn_count = excluded.turn_count,
               facts_captured = excluded.facts_captured,
               ended_at = excluded.ended_at",
        )
        .bind(&summary.call_id.0)
        .bind(&summary.company_id.0)
        .bind(&summary.caller_phone)
        .bind(summary.outcome.as_str())
        .bind(summary.intent.as_str())
        .bind(summary.tier_used.map(|tier| tier.as_str()))
        .bind(summary.appointment_id.as_ref().map(|id| id.0.as_str()))
        .bind(summary.turn_count as i64)
        .bind(summary.facts_captured as i64)
        .bind(summary.started_at)
        .bind(summary.ended_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_by_call(&self, call_id: &CallId) -> Result<Option<CallSummary>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM call_summary WHERE call_id = ?")
            .bind(&call_id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(summary_from_row).transpose()
    }

    async fn list_for_date(&self, date: NaiveDate) -> Result<Vec<CallSummary>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM call_summary WHERE DATE(started_at) = ?")
            .bind(date.format("%Y-%m-%d").to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(summary_from_row).collect()
    }

    async fn dates_with_calls_since(
        &self,
        since: NaiveDate,
    ) -> Result<Vec<NaiveDate>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT DISTINCT DATE(started_at) AS day FROM call_summary
             WHERE DATE(started_at) >= ? ORDER BY day",
        )
        .bind(since.format("%Y-%m-%d").to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let day = row.get::<String, _>("day");
                day.parse::<NaiveDate>()
                    .map_err(|error| RepositoryError::Decode(format!("bad date `{day}`: {error}")))
            })
            .collect()
    }

    async fn count_ended_before(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM call_summary WHERE ended_at < ?")
            .bind(cutoff)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>("n") as u64)
    }

    async fn delete_ended_before(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM call_summary WHERE ended_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
