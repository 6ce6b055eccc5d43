use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::PgPool;
use std::time::Duration;
use uuid::Uuid;

use crate::error::QueueError;
use crate::queue::{Job, JobKind, JobQueue};

/// Job queue on `pushaas_cms.jobs`.
///
/// Rows move `pending -> running -> done | rejected`. Claims use
/// `FOR UPDATE SKIP LOCKED` so concurrent workers never take the same row.
#[derive(Debug, Clone)]
pub struct PgJobQueue {
    pool: PgPool,
}

impl PgJobQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Put jobs left `running` by a crashed worker back to `pending`
    pub async fn requeue_running(&self) -> Result<u64, QueueError> {
        let result = sqlx::query(
            "UPDATE pushaas_cms.jobs SET state = 'pending', updated_at = NOW() WHERE state = 'running'",
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn finish(&self, job_id: Uuid, state: &str, reason: Option<&str>) -> Result<(), QueueError> {
        let result = sqlx::query(
            r#"
            UPDATE pushaas_cms.jobs
            SET state = $2, reason = $3, updated_at = NOW()
            WHERE id = $1 AND state = 'running'
            "#,
        )
        .bind(job_id)
        .bind(state)
        .bind(reason)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(QueueError::JobNotFound(job_id));
        }
        Ok(())
    }
}

#[async_trait]
impl JobQueue for PgJobQueue {
    async fn enqueue(&self, kind: JobKind, payload: serde_json::Value) -> Result<Uuid, QueueError> {
        let job = Job::new(kind, payload);
        sqlx::query("INSERT INTO pushaas_cms.jobs (id, kind, payload) VALUES ($1, $2, $3)")
            .bind(job.id)
            .bind(&job.kind)
            .bind(Json(&job.payload))
            .execute(&self.pool)
            .await?;

        tracing::debug!(job_id = %job.id, kind = %kind, "job enqueued");
        Ok(job.id)
    }

    async fn dequeue(&self) -> Result<Option<Job>, QueueError> {
        let row: Option<(Uuid, String, Json<serde_json::Value>)> = sqlx::query_as(
            r#"
            UPDATE pushaas_cms.jobs
            SET state = 'running', updated_at = NOW()
            WHERE id = (
                SELECT id FROM pushaas_cms.jobs
                WHERE state = 'pending'
                ORDER BY created_at
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, kind, payload
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(id, kind, Json(payload))| Job { id, kind, payload }))
    }

    async fn ack(&self, job_id: Uuid) -> Result<(), QueueError> {
        self.finish(job_id, "done", None).await
    }

    async fn reject(&self, job_id: Uuid, reason: &str) -> Result<(), QueueError> {
        self.finish(job_id, "rejected", Some(reason)).await
    }

    async fn wait_for_jobs(&self, timeout: Duration) {
        tokio::time::sleep(timeout).await;
    }
}
