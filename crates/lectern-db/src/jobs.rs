//! PostgreSQL job ledger.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::{Pool, Postgres, Row};
use tracing::debug;
use uuid::Uuid;

use lectern_core::{
    Error, GeneratedItem, GenerationPlan, Job, JobStatus, JobStore, JobUpdate, Result,
};

const JOB_COLUMNS: &str = "id, textbook_id, status, progress, current_unit, total_units, \
     error_message, generation_plan, created_at, updated_at";

/// PostgreSQL implementation of [`JobStore`] over `generation_jobs` and
/// `generated_items`.
#[derive(Clone)]
pub struct PgJobStore {
    pool: Pool<Postgres>,
}

impl PgJobStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_job_row(row: sqlx::postgres::PgRow) -> Result<Job> {
        let status: String = row.get("status");
        let plan: Option<JsonValue> = row.get("generation_plan");
        let generation_plan = plan
            .map(serde_json::from_value::<GenerationPlan>)
            .transpose()?;

        Ok(Job {
            id: row.get("id"),
            textbook_id: row.get("textbook_id"),
            status: status.parse()?,
            progress: row.get("progress"),
            current_unit: row.get("current_unit"),
            total_units: row.get("total_units"),
            error_message: row.get("error_message"),
            generation_plan,
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    /// Items stored for one chunk, in ordinal order.
    pub async fn items_for_chunk(&self, job_id: Uuid, chunk_id: &str) -> Result<Vec<GeneratedItem>> {
        let rows = sqlx::query(
            "SELECT kind, content FROM generated_items
             WHERE job_id = $1 AND chunk_id = $2
             ORDER BY ordinal",
        )
        .bind(job_id)
        .bind(chunk_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows
            .into_iter()
            .map(|row| GeneratedItem {
                kind: row.get("kind"),
                content: row.get("content"),
            })
            .collect())
    }

    /// Total items stored for a job.
    pub async fn count_items(&self, job_id: Uuid) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM generated_items WHERE job_id = $1")
            .bind(job_id)
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Database)
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create_job(&self, id: Uuid, textbook_id: Uuid, total_units: i32) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO generation_jobs (id, textbook_id, status, progress, total_units)
             VALUES ($1, $2, 'PENDING', 0, $3)
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(id)
        .bind(textbook_id)
        .bind(total_units.max(0))
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(result.rows_affected() == 1)
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM generation_jobs WHERE id = $1",
            JOB_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.map(Self::parse_job_row).transpose()
    }

    async fn update_job(&self, id: Uuid, update: JobUpdate) -> Result<bool> {
        // One statement so the row is never observed half-updated. The CASE
        // arms keep COMPLETED at full progress and FAILED with an error.
        let status = update.status.map(|s| s.as_str());
        let (set_unit, unit) = match update.current_unit {
            Some(unit) => (true, unit),
            None => (false, None),
        };

        let result = sqlx::query(
            "UPDATE generation_jobs SET
                 status = COALESCE($2, status),
                 progress = CASE
                     WHEN $2 = 'COMPLETED' THEN 1.0
                     ELSE COALESCE($3, progress)
                 END,
                 current_unit = CASE WHEN $4 THEN $5 ELSE current_unit END,
                 total_units = COALESCE($6, total_units),
                 error_message = CASE
                     WHEN $2 = 'FAILED' THEN COALESCE($7, error_message, 'Job failed')
                     WHEN $2 IS NOT NULL THEN NULL
                     ELSE COALESCE($7, error_message)
                 END,
                 updated_at = NOW()
             WHERE id = $1",
        )
        .bind(id)
        .bind(status)
        .bind(update.progress)
        .bind(set_unit)
        .bind(unit)
        .bind(update.total_units)
        .bind(update.error_message)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(result.rows_affected() == 1)
    }

    async fn set_job_plan(&self, id: Uuid, plan: &GenerationPlan) -> Result<bool> {
        let payload = serde_json::to_value(plan)?;
        let result = sqlx::query(
            "UPDATE generation_jobs SET generation_plan = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(payload)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(result.rows_affected() == 1)
    }

    async fn store_generated_items(
        &self,
        job_id: Uuid,
        chunk_id: &str,
        items: &[GeneratedItem],
    ) -> Result<usize> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        // Drop leftovers from an earlier, longer write of the same chunk.
        sqlx::query(
            "DELETE FROM generated_items WHERE job_id = $1 AND chunk_id = $2 AND ordinal >= $3",
        )
        .bind(job_id)
        .bind(chunk_id)
        .bind(items.len() as i32)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        for (ordinal, item) in items.iter().enumerate() {
            sqlx::query(
                "INSERT INTO generated_items (job_id, chunk_id, ordinal, kind, content)
                 VALUES ($1, $2, $3, $4, $5)
                 ON CONFLICT (job_id, chunk_id, ordinal)
                 DO UPDATE SET kind = EXCLUDED.kind, content = EXCLUDED.content",
            )
            .bind(job_id)
            .bind(chunk_id)
            .bind(ordinal as i32)
            .bind(&item.kind)
            .bind(&item.content)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        }

        tx.commit().await.map_err(Error::Database)?;

        debug!(
            subsystem = "db",
            component = "jobs",
            op = "store_items",
            job_id = %job_id,
            chunk_id,
            item_count = items.len(),
            "Stored generated items"
        );
        Ok(items.len())
    }

    async fn list_jobs_by_status(&self, statuses: &[JobStatus]) -> Result<Vec<Job>> {
        let statuses: Vec<String> = statuses.iter().map(|s| s.as_str().to_string()).collect();
        let rows = sqlx::query(&format!(
            "SELECT {} FROM generation_jobs WHERE status = ANY($1) ORDER BY created_at",
            JOB_COLUMNS
        ))
        .bind(&statuses)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.into_iter().map(Self::parse_job_row).collect()
    }
}
