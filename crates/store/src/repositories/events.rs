use chrono::{DateTime, Utc};
use sqlx::Row;

use super::{BehavioralEvent, BehavioralEventRepository, RepositoryError};
use crate::DbPool;

pub struct SqlBehavioralEventRepository {
    pool: DbPool,
}

impl SqlBehavioralEventRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl BehavioralEventRepository for SqlBehavioralEventRepository {
    async fn append(&self, event: BehavioralEvent) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO behavioral_event (id, call_id, company_id, kind, occurred_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&event.id)
        .bind(&event.call_id.0)
        .bind(&event.company_id.0)
        .bind(&event.kind)
        .bind(event.occurred_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn count_occurred_before(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM behavioral_event WHERE occurred_at < ?")
            .bind(cutoff)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>("n") as u64)
    }

    async fn delete_occurred_before(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM behavioral_event WHERE occurred_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
