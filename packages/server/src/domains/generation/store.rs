//! Job persistence.
//!
//! Every status change is a compare-and-set on the persisted status, so the
//! guarantees hold across processes sharing one database.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::PgPool;

use super::error::StoreError;
use super::models::{Completion, GenerationJob, JobFilter, NewJob, ResultRetention};
use crate::common::{JobId, OwnerId};
use crate::domains::credits::store::debit_in_tx;
use crate::domains::credits::{ChargeRef, CreditReason};

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create(&self, job: NewJob) -> Result<GenerationJob, StoreError>;

    async fn get(&self, id: JobId) -> Result<GenerationJob, StoreError>;

    async fn list(&self, owner: OwnerId, filter: &JobFilter) -> Result<Vec<GenerationJob>, StoreError>;

    /// `{Waiting, Done, Error} -> Processing`, bumping `attempt` and holding
    /// the claim for `lease`. A Processing job whose lease has expired is
    /// claimed the same way; its old runner's writes then go stale.
    ///
    /// Fails with `AlreadyProcessing` when another caller holds a live claim.
    async fn begin_processing(
        &self,
        id: JobId,
        retention: ResultRetention,
        lease: Duration,
    ) -> Result<GenerationJob, StoreError>;

    /// `Processing -> Done` for `completion.attempt`, charging the owner in
    /// the same atomic unit. Nothing is written if either part fails.
    async fn complete(&self, completion: Completion) -> Result<GenerationJob, StoreError>;

    /// `Processing -> Error` for `attempt`. No charge.
    async fn fail(&self, id: JobId, attempt: i32, message: &str) -> Result<GenerationJob, StoreError>;
}

// ============================================================================
// Postgres
// ============================================================================

pub struct PostgresJobStore {
    pool: PgPool,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Tell a missing job apart from a lost compare-and-set.
    async fn exists(&self, id: JobId) -> Result<bool, StoreError> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM generation_jobs WHERE id = $1)")
                .bind(id)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }
}

#[async_trait]
impl JobStore for PostgresJobStore {
    async fn create(&self, job: NewJob) -> Result<GenerationJob, StoreError> {
        sqlx::query_as::<_, GenerationJob>(
            r#"
            INSERT INTO generation_jobs (id, owner_id, kind, inputs, status)
            VALUES ($1, $2, $3, $4, 'waiting')
            RETURNING *
            "#,
        )
        .bind(job.id)
        .bind(job.owner_id)
        .bind(job.kind)
        .bind(Json(&job.inputs))
        .fetch_one(&self.pool)
        .await
        .map_err(Into::into)
    }

    async fn get(&self, id: JobId) -> Result<GenerationJob, StoreError> {
        sqlx::query_as::<_, GenerationJob>("SELECT * FROM generation_jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound(id))
    }

    async fn list(&self, owner: OwnerId, filter: &JobFilter) -> Result<Vec<GenerationJob>, StoreError> {
        sqlx::query_as::<_, GenerationJob>(
            r#"
            SELECT * FROM generation_jobs
            WHERE owner_id = $1
              AND ($2::generation_job_kind IS NULL OR kind = $2)
              AND ($3::generation_job_status IS NULL OR status = $3)
            ORDER BY created_at DESC, id DESC
            LIMIT $4 OFFSET $5
            "#,
        )
        .bind(owner)
        .bind(filter.kind)
        .bind(filter.status)
        .bind(filter.clamped_limit())
        .bind(filter.clamped_offset())
        .fetch_all(&self.pool)
        .await
        .map_err(Into::into)
    }

    async fn begin_processing(
        &self,
        id: JobId,
        retention: ResultRetention,
        lease: Duration,
    ) -> Result<GenerationJob, StoreError> {
        let clear_result = retention == ResultRetention::ClearAtStart;

        let claimed = sqlx::query_as::<_, GenerationJob>(
            r#"
            UPDATE generation_jobs
            SET status = 'processing',
                attempt = attempt + 1,
                started_at = NOW(),
                completed_at = NULL,
                error_message = NULL,
                result_payload = CASE WHEN $2 THEN NULL ELSE result_payload END,
                degraded = CASE WHEN $2 THEN FALSE ELSE degraded END,
                lease_expires_at = NOW() + ($3 || ' milliseconds')::INTERVAL,
                updated_at = NOW()
            WHERE id = $1
              AND (status <> 'processing' OR lease_expires_at < NOW())
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(clear_result)
        .bind(lease.as_millis().to_string())
        .fetch_optional(&self.pool)
        .await?;

        match claimed {
            Some(job) => Ok(job),
            None if self.exists(id).await? => Err(StoreError::AlreadyProcessing(id)),
            None => Err(StoreError::NotFound(id)),
        }
    }

    async fn complete(&self, completion: Completion) -> Result<GenerationJob, StoreError> {
        let mut tx = self.pool.begin().await?;

        let job = sqlx::query_as::<_, GenerationJob>(
            r#"
            UPDATE generation_jobs
            SET status = 'done',
                result_payload = $3,
                degraded = $4,
                error_message = NULL,
                lease_expires_at = NULL,
                completed_at = NOW(),
                updated_at = NOW()
            WHERE id = $1 AND status = 'processing' AND attempt = $2
            RETURNING *
            "#,
        )
        .bind(completion.job_id)
        .bind(completion.attempt)
        .bind(&completion.payload)
        .bind(completion.degraded)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::StaleTransition {
            job_id: completion.job_id,
            attempt: completion.attempt,
        })?;

        if completion.charge > 0 {
            debit_in_tx(
                &mut *tx,
                completion.owner_id,
                completion.charge,
                CreditReason::Generation,
                Some(ChargeRef {
                    job_id: completion.job_id,
                    attempt: completion.attempt,
                }),
            )
            .await?;
        }

        tx.commit().await?;
        Ok(job)
    }

    async fn fail(&self, id: JobId, attempt: i32, message: &str) -> Result<GenerationJob, StoreError> {
        sqlx::query_as::<_, GenerationJob>(
            r#"
            UPDATE generation_jobs
            SET status = 'error',
                error_message = $3,
                lease_expires_at = NULL,
                completed_at = NOW(),
                updated_at = NOW()
            WHERE id = $1 AND status = 'processing' AND attempt = $2
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(attempt)
        .bind(message)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::StaleTransition { job_id: id, attempt })
    }
}
