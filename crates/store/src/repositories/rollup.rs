use chrono::NaiveDate;
use sqlx::Row;

use frontdesk_core::domain::call::CompanyId;

use super::{DailyRollup, RepositoryError, RollupCounts, RollupRepository};
use crate::DbPool;

pub struct SqlRollupRepository {
    pool: DbPool,
}

impl SqlRollupRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl RollupRepository for SqlRollupRepository {
    async fn upsert(&self, rollup: DailyRollup) -> Result<(), RepositoryError> {
        let counts = serde_json::to_string(&rollup.counts)
            .map_err(|error| RepositoryError::Decode(error.to_string()))?;
        sqlx::query(
            "INSERT INTO daily_rollup (company_id, date, counts_json)
             VALUES (?, ?, ?)
             ON CONFLICT(company_id, date) DO UPDATE SET counts_json = excluded.counts_json",
        )
        .bind(&rollup.company_id.0)
        .bind(rollup.date.format("%Y-%m-%d").to_string())
        .bind(counts)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find(
        &self,
        company_id: &CompanyId,
        date: NaiveDate,
    ) -> Result<Option<DailyRollup>, RepositoryError> {
        let row = sqlx::query(
            "SELECT counts_json FROM daily_rollup WHERE company_id = ? AND date = ?",
        )
        .bind(&company_id.0)
        .bind(date.format("%Y-%m-%d").to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            let counts: RollupCounts =
                serde_json::from_str(&row.get::<String, _>("counts_json"))
                    .map_err(|error| RepositoryError::Decode(error.to_string()))?;
            Ok(DailyRollup { company_id: company_id.clone(), date, counts })
        })
        .transpose()
    }

    async fn dates_with_rollups_since(
        &self,
        since: NaiveDate,
    ) -> Result<Vec<NaiveDate>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT DISTINCT date FROM daily_rollup WHERE date >= ? ORDER BY date",
        )
        .bind(since.format("%Y-%m-%d").to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let date = row.get::<String, _>("date");
                date.parse::<NaiveDate>()
                    .map_err(|error| RepositoryError::Decode(format!("bad date `{date}`: {error}")))
            })
            .collect()
    }
}
