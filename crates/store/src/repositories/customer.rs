use chrono::{DateTime, Utc};
use sqlx::Row;

use frontdesk_core::domain::call::CompanyId;

use super::{CustomerRecord, CustomerRepository, RepositoryError};
use crate::DbPool;

pub struct SqlCustomerRepository {
    pool: DbPool,
}

impl SqlCustomerRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl CustomerRepository for SqlCustomerRepository {
    async fn save(&self, record: CustomerRecord) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO customer_record
               (id, company_id, name, phone, address, notes, call_count, last_call_at, anonymized)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
               name = excluded.name,
               phone = excluded.phone,
               address = excluded.address,
               notes = excluded.notes,
               call_count = excluded.call_count,
               last_call_at = excluded.last_call_at,
               anonymized = excluded.anonymized",
        )
        .bind(&record.id)
        .bind(&record.company_id.0)
        .bind(&record.name)
        .bind(&record.phone)
        .bind(&record.address)
        .bind(&record.notes)
        .bind(record.call_count as i64)
        .bind(record.last_call_at)
        .bind(record.anonymized)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<CustomerRecord>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM customer_record WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| CustomerRecord {
            id: row.get::<String, _>("id"),
            company_id: CompanyId(row.get::<String, _>("company_id")),
            name: row.get::<Option<String>, _>("name"),
            phone: row.get::<Option<String>, _>("phone"),
            address: row.get::<Option<String>, _>("address"),
            notes: row.get::<Option<String>, _>("notes"),
            call_count: row.get::<i64, _>("call_count") as u32,
            last_call_at: row.get::<DateTime<Utc>, _>("last_call_at"),
            anonymized: row.get::<bool, _>("anonymized"),
        }))
    }

    async fn count_dormant_before(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM customer_record
             WHERE last_call_at < ? AND anonymized = FALSE",
        )
        .bind(cutoff)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get::<i64, _>("n") as u64)
    }

    async fn anonymize_dormant_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            "UPDATE customer_record SET
               name = NULL, phone = NULL, address = NULL, notes = NULL, anonymized = TRUE
             WHERE last_call_at < ? AND anonymized = FALSE",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
