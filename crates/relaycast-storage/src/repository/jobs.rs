//! Job queue repository

use crate::db::DatabasePool;
use crate::models::Job;
use chrono::{Duration, Utc};
use relaycast_common::{Error, Result};
use uuid::Uuid;

/// Job repository backed by the `jobs` table
#[derive(Clone)]
pub struct JobRepository {
    pool: DatabasePool,
}

impl JobRepository {
    /// Create a new job repository
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// Insert a pending job that is due immediately
    pub async fn enqueue(
        &self,
        queue: &str,
        payload: serde_json::Value,
        max_attempts: i32,
    ) -> Result<Uuid> {
        let id = Uuid::now_v7();

        sqlx::query(
            r#"
            INSERT INTO jobs (id, queue, payload, status, attempts, max_attempts, scheduled_at, created_at)
            VALUES ($1, $2, $3, 'pending', 0, $4, NOW(), NOW())
            "#,
        )
        .bind(id)
        .bind(queue)
        .bind(&payload)
        .bind(max_attempts)
        .execute(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(id)
    }

    /// Claim the oldest due job of a queue, moving it to `processing`.
    ///
    /// A `processing` job whose heartbeat is older than `stale_after` is
    /// treated as abandoned by a dead consumer and claimed again; that
    /// takeover counts as an attempt. Concurrent consumers never claim the
    /// same row (`SKIP LOCKED`).
    pub async fn claim_next(
        &self,
        queue: &str,
        stale_after: std::time::Duration,
    ) -> Result<Option<Job>> {
        sqlx::query_as::<_, Job>(
            r#"
            UPDATE jobs SET
                attempts = CASE WHEN status = 'processing' THEN attempts + 1 ELSE attempts END,
                status = 'processing',
                started_at = NOW()
            WHERE id = (
                SELECT id FROM jobs
                WHERE queue = $1
                  AND (
                    (status = 'pending' AND scheduled_at <= NOW())
                    OR (status = 'processing'
                        AND started_at < NOW() - $2 * INTERVAL '1 second')
                  )
                ORDER BY scheduled_at ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING *
            "#,
        )
        .bind(queue)
        .bind(stale_after.as_secs_f64())
        .fetch_optional(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))
    }

    /// Refresh the heartbeat of a job still being processed
    pub async fn heartbeat(&self, job_id: Uuid) -> Result<()> {
        sqlx::query("UPDATE jobs SET started_at = NOW() WHERE id = $1 AND status = 'processing'")
            .bind(job_id)
            .execute(self.pool.pool())
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        Ok(())
    }

    /// Mark a job as completed
    pub async fn mark_completed(&self, job_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'completed', completed_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .execute(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(())
    }

    /// Mark a job as permanently failed
    pub async fn mark_failed(&self, job_id: Uuid, attempts: i32, error: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'failed', attempts = $2, last_error = $3, completed_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(attempts)
        .bind(error)
        .execute(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(())
    }

    /// Put a job back to `pending`, due after `delay`
    pub async fn schedule_retry(
        &self,
        job_id: Uuid,
        attempts: i32,
        error: &str,
        delay: Duration,
    ) -> Result<chrono::DateTime<Utc>> {
        let scheduled_at = Utc::now() + delay;

        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'pending',
                attempts = $2,
                last_error = $3,
                scheduled_at = $4
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(attempts)
        .bind(error)
        .bind(scheduled_at)
        .execute(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(scheduled_at)
    }

    /// Get queue statistics
    pub async fn stats(&self, queue: &str) -> Result<QueueStats> {
        let counts: Vec<(String, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*) FROM jobs WHERE queue = $1 GROUP BY status",
        )
        .bind(queue)
        .fetch_all(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        let mut stats = QueueStats::default();
        for (status, count) in counts {
            let count = count as u64;
            match status.as_str() {
                "pending" => stats.pending = count,
                "processing" => stats.processing = count,
                "failed" => stats.failed = count,
                _ => {}
            }
        }
        Ok(stats)
    }
}

/// Queue statistics
#[derive(Debug, Clone, Default)]
pub struct QueueStats {
    pub pending: u64,
    pub processing: u64,
    pub failed: u64,
}
