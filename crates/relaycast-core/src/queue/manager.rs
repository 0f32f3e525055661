//! Queue Manager - Consumes campaign dispatch jobs
//!
//! Jobs live in the `jobs` table under the `campaign_dispatch` queue. One
//! job is processed at a time per process, which keeps the rate gate's
//! in-memory state correct.
//!
//! While a job runs its heartbeat is refreshed every third of
//! `stale_after_secs`. A job left in `processing` by a consumer that died
//! stops receiving heartbeats and is claimed again once the window passes;
//! the worker's resume set keeps that second run from resending.

use crate::dispatch::{DispatchOutcome, DispatchWorker};
use chrono::Duration;
use relaycast_common::config::QueueConfig;
use relaycast_common::types::{CampaignId, DispatchJob};
use relaycast_common::{Error, Result};
use relaycast_storage::models::Job;
use relaycast_storage::{JobRepository, QueueStats};
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tokio::time::{interval, Duration as TokioDuration, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Queue name for campaign dispatch jobs
pub const DISPATCH_QUEUE: &str = "campaign_dispatch";

/// Queue Manager for campaign dispatch jobs
pub struct QueueManager {
    jobs: JobRepository,
    worker: Arc<DispatchWorker>,
    config: QueueConfig,
}

impl QueueManager {
    /// Create a new queue manager
    pub fn new(jobs: JobRepository, worker: Arc<DispatchWorker>, config: QueueConfig) -> Self {
        Self {
            jobs,
            worker,
            config,
        }
    }

    /// Run the queue processor until `shutdown` is cancelled.
    ///
    /// A job in progress is finished before the processor stops.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut ticker = interval(TokioDuration::from_secs(self.config.poll_interval_secs.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(queue = DISPATCH_QUEUE, "Queue processor started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                () = shutdown.cancelled() => break,
            }

            if let Err(e) = self.process_pending_jobs(&shutdown).await {
                error!("Error processing queue: {}", e);
            }
        }

        info!(queue = DISPATCH_QUEUE, "Queue processor stopped");
    }

    /// Enqueue a dispatch job for a campaign
    pub async fn enqueue(&self, campaign_id: CampaignId) -> Result<Uuid> {
        let payload = encode_payload(campaign_id)?;
        let job_id = self
            .jobs
            .enqueue(DISPATCH_QUEUE, payload, self.config.max_attempts)
            .await?;

        info!(campaign_id, %job_id, "Enqueued dispatch job");
        Ok(job_id)
    }

    /// Get queue statistics
    pub async fn stats(&self) -> Result<QueueStats> {
        self.jobs.stats(DISPATCH_QUEUE).await
    }

    /// Claim and process due jobs one by one until none are left
    async fn process_pending_jobs(&self, shutdown: &CancellationToken) -> Result<()> {
        while !shutdown.is_cancelled() {
            match self.jobs.claim_next(DISPATCH_QUEUE, self.stale_after()).await? {
                Some(job) => self.process_job(job).await,
                None => break,
            }
        }
        Ok(())
    }

    fn stale_after(&self) -> TokioDuration {
        TokioDuration::from_secs(self.config.stale_after_secs)
    }

    /// Process a single job
    async fn process_job(&self, job: Job) {
        let job_id = job.id;
        let attempts = job.attempts + 1;
        debug!(%job_id, attempt = attempts, "Processing job");

        // Only a takeover of an abandoned job can get here without attempts left.
        if job.attempts >= job.max_attempts {
            error!(%job_id, "Abandoned job has no attempts left, marking as failed");
            let reason = "consumer stopped while processing";
            if let Err(e) = self.jobs.mark_failed(job_id, job.attempts, reason).await {
                error!(%job_id, "Failed to mark job as failed: {}", e);
            }
            return;
        }

        let dispatch = match decode_payload(&job) {
            Ok(dispatch) => dispatch,
            Err(e) => {
                error!(%job_id, "Failed to parse job payload: {}", e);
                if let Err(e) = self.jobs.mark_failed(job_id, attempts, &e.to_string()).await {
                    error!(%job_id, "Failed to mark job as failed: {}", e);
                }
                return;
            }
        };

        let jobs = &self.jobs;
        let result = with_heartbeat(
            self.worker.run(dispatch.campaign_id),
            heartbeat_period(self.stale_after()),
            move || async move {
                if let Err(e) = jobs.heartbeat(job_id).await {
                    warn!(%job_id, "Failed to refresh job heartbeat: {}", e);
                }
            },
        )
        .await;

        match result {
            Ok(outcome) => {
                log_outcome(job_id, dispatch.campaign_id, outcome);
                if let Err(e) = self.jobs.mark_completed(job_id).await {
                    error!(%job_id, "Failed to mark job as completed: {}", e);
                }
            }
            Err(e) => {
                warn!(%job_id, campaign_id = dispatch.campaign_id, "Job failed: {}", e);
                let result = match retry_delay(attempts, job.max_attempts, &e) {
                    Some(delay) => self
                        .jobs
                        .schedule_retry(job_id, attempts, &e.to_string(), delay)
                        .await
                        .map(|scheduled_at| {
                            info!(
                                %job_id,
                                %scheduled_at,
                                "Job scheduled for retry (attempt {})",
                                attempts + 1
                            );
                        }),
                    None => {
                        error!(%job_id, attempts, "Job failed permanently");
                        self.jobs.mark_failed(job_id, attempts, &e.to_string()).await
                    }
                };
                if let Err(e) = result {
                    error!(%job_id, "Failed to record job failure: {}", e);
                }
            }
        }
    }
}

/// Build the payload of a dispatch job
fn encode_payload(campaign_id: CampaignId) -> Result<serde_json::Value> {
    serde_json::to_value(DispatchJob { campaign_id }).map_err(|e| Error::Internal(e.to_string()))
}

/// Decode a job's dispatch payload
fn decode_payload(job: &Job) -> std::result::Result<DispatchJob, serde_json::Error> {
    serde_json::from_value(job.payload.clone())
}

fn log_outcome(job_id: Uuid, campaign_id: CampaignId, outcome: DispatchOutcome) {
    match outcome {
        DispatchOutcome::Skipped => debug!(%job_id, campaign_id, "Dispatch skipped"),
        DispatchOutcome::NoMessages => warn!(%job_id, campaign_id, "Campaign had no messages"),
        DispatchOutcome::Completed { sent, failed } => {
            info!(%job_id, campaign_id, sent, failed, "Dispatch completed")
        }
        DispatchOutcome::Paused { sent, failed } => {
            info!(%job_id, campaign_id, sent, failed, "Dispatch paused")
        }
        DispatchOutcome::Cancelled { sent, failed } => {
            info!(%job_id, campaign_id, sent, failed, "Dispatch cancelled")
        }
    }
}

/// Delay before the next attempt, or `None` when the job should fail now
fn retry_delay(attempts: i32, max_attempts: i32, error: &Error) -> Option<Duration> {
    if attempts >= max_attempts || !error.is_transient() {
        return None;
    }
    Some(calculate_backoff(attempts))
}

fn heartbeat_period(stale_after: TokioDuration) -> TokioDuration {
    (stale_after / 3).max(TokioDuration::from_secs(1))
}

/// Drive `work` to completion, calling `beat` every `period` meanwhile
async fn with_heartbeat<F, B, BF>(work: F, period: TokioDuration, mut beat: B) -> F::Output
where
    F: Future,
    B: FnMut() -> BF,
    BF: Future<Output = ()>,
{
    tokio::pin!(work);
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            output = &mut work => return output,
            _ = ticker.tick() => beat().await,
        }
    }
}

/// Calculate exponential backoff delay
fn calculate_backoff(attempts: i32) -> Duration {
    // Base: 1 minute, max: 4 hours
    let exponent = attempts.clamp(0, 8) as u32;
    let minutes = std::cmp::min(2_i64.pow(exponent), 240);
    Duration::minutes(minutes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn job(payload: serde_json::Value) -> Job {
        Job {
            id: Uuid::now_v7(),
            queue: DISPATCH_QUEUE.to_string(),
            payload,
            status: "processing".to_string(),
            attempts: 0,
            max_attempts: 3,
            last_error: None,
            scheduled_at: Utc::now(),
            started_at: Some(Utc::now()),
            completed_at: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_calculate_backoff() {
        assert_eq!(calculate_backoff(0), Duration::minutes(1));
        assert_eq!(calculate_backoff(1), Duration::minutes(2));
        assert_eq!(calculate_backoff(2), Duration::minutes(4));
        assert_eq!(calculate_backoff(3), Duration::minutes(8));
        assert_eq!(calculate_backoff(10), Duration::minutes(240));
        assert_eq!(calculate_backoff(64), Duration::minutes(240));
    }

    #[test]
    fn test_decode_payload() {
        let decoded = decode_payload(&job(serde_json::json!({ "campaignId": 7 }))).unwrap();
        assert_eq!(decoded, DispatchJob { campaign_id: 7 });
    }

    #[test]
    fn test_enqueued_payload_decodes() {
        let payload = encode_payload(42).unwrap();
        assert_eq!(payload, serde_json::json!({ "campaignId": 42 }));

        let decoded = decode_payload(&job(payload)).unwrap();
        assert_eq!(decoded.campaign_id, 42);
    }

    #[test]
    fn test_retry_only_transient_errors() {
        let db = Error::Database("connection reset".into());
        assert_eq!(retry_delay(1, 3, &db), Some(Duration::minutes(2)));
        assert_eq!(retry_delay(3, 3, &db), None);

        let overflow = Error::Internal("count overflows".into());
        assert_eq!(retry_delay(1, 3, &overflow), None);
    }

    #[test]
    fn test_heartbeat_period() {
        assert_eq!(
            heartbeat_period(TokioDuration::from_secs(300)),
            TokioDuration::from_secs(100)
        );
        assert_eq!(
            heartbeat_period(TokioDuration::from_secs(2)),
            TokioDuration::from_secs(1)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_runs_while_work_is_pending() {
        let beats = Arc::new(AtomicUsize::new(0));
        let counter = beats.clone();

        let output = with_heartbeat(
            async {
                tokio::time::sleep(TokioDuration::from_secs(35)).await;
                7
            },
            TokioDuration::from_secs(10),
            move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            },
        )
        .await;

        assert_eq!(output, 7);
        assert_eq!(beats.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_heartbeat_for_quick_work() {
        let beats = Arc::new(AtomicUsize::new(0));
        let counter = beats.clone();

        with_heartbeat(async {}, TokioDuration::from_secs(10), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        })
        .await;

        assert_eq!(beats.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_decode_payload_rejects_malformed() {
        assert!(decode_payload(&job(serde_json::json!({ "campaign": "7" }))).is_err());
        assert!(decode_payload(&job(serde_json::json!(null))).is_err());
    }
}
