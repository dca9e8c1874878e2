use chrono::{DateTime, Utc};
use sqlx::Row;

use frontdesk_core::domain::call::{CallId, CompanyId};

use super::{CallTranscript, ColdObjectRef, RepositoryError, TranscriptRepository};
use crate::DbPool;

pub struct SqlTranscriptRepository {
    pool: DbPool,
}

impl SqlTranscriptRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn transcript_from_row(row: &sqlx::sqlite::SqliteRow) -> CallTranscript {
    let bucket = row.get::<Option<String>, _>("cold_bucket");
    let object_key = row.get::<Option<String>, _>("cold_object_key");
    let cold_ref = match (bucket, object_key) {
        (Some(bucket), Some(object_key)) => Some(ColdObjectRef { bucket, object_key }),
        _ => None,
    };
    CallTranscript {
        call_id: CallId(row.get::<String, _>("call_id")),
        company_id: CompanyId(row.get::<String, _>("company_id")),
        ended_at: row.get::<DateTime<Utc>, _>("ended_at"),
        turn_count: row.get::<i64, _>("turn_count") as u32,
        turns_json: row.get::<Option<String>, _>("turns_json"),
        cold_ref,
        moved_to_cold_at: row.get::<Option<DateTime<Utc>>, _>("moved_to_cold_at"),
    }
}

#[async_trait::async_trait]
impl TranscriptRepository for SqlTranscriptRepository {
    async fn save(&self, transcript: CallTranscript) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO call_transcript
               (call_id, company_id, ended_at, turn_count, turns_json,
                cold_bucket, cold_object_key, moved_to_cold_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(call_id) DO UPDATE SET
               ended_at = excluded.ended_at,
               turn_count = excluded.turn_count,
               turns_json = excluded.turns_json",
        )
        .bind(&transcript.call_id.0)
        .bind(&transcript.company_id.0)
        .bind(transcript.ended_at)
        .bind(transcript.turn_count as i64)
        .bind(&transcript.turns_json)
        .bind(transcript.cold_ref.as_ref().map(|cold| cold.bucket.as_str()))
        .bind(transcript.cold_ref.as_ref().map(|cold| cold.object_key.as_str()))
        .bind(transcript.moved_to_cold_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_by_call(
        &self,
        call_id: &CallId,
    ) -> Result<Option<CallTranscript>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM call_transcript WHERE call_id = ?")
            .bind(&call_id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(transcript_from_row))
    }

    async fn list_hot_ended_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<CallTranscript>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM call_transcript
             WHERE ended_at < ? AND turns_json IS NOT NULL AND moved_to_cold_at IS NULL",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(transcript_from_row).collect())
    }

    async fn confirm_cold_migration(
        &self,
        call_id: &CallId,
        cold_ref: ColdObjectRef,
        moved_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "UPDATE call_transcript SET
               turns_json = NULL,
               cold_bucket = ?,
               cold_object_key = ?,
               moved_to_cold_at = ?
             WHERE call_id = ?",
        )
        .bind(&cold_ref.bucket)
        .bind(&cold_ref.object_key)
        .bind(moved_at)
        .bind(&call_id.0)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn count_ended_before(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM call_transcript WHERE ended_at < ?")
            .bind(cutoff)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>("n") as u64)
    }

    async fn delete_ended_before(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM call_transcript WHERE ended_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
