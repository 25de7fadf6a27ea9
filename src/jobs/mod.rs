//! Durable job queue
//!
//! Jobs live in the same SQLite database as the documents they act on, so an
//! enqueue happens in the same store as the state it will later mutate. The
//! queue survives restarts; claims are leases, not ownership, and a crashed
//! worker's jobs become claimable again when the lease expires.

pub mod worker;

use crate::error::{Error, Result};
use crate::meta::{Job, JobOutcome, JobStatus, MetaDb};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

/// What a job asks a worker to do
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobPayload {
    /// Parse, chunk, embed, and index an uploaded document
    ParseDocument { doc_id: String },
    /// Replay a workspace's chunk rows into the vector index
    RebuildIndex { workspace_id: String },
}

impl JobPayload {
    pub fn job_type(&self) -> &'static str {
        match self {
            JobPayload::ParseDocument { .. } => "parse_document",
            JobPayload::RebuildIndex { .. } => "rebuild_index",
        }
    }

    pub fn doc_id(&self) -> Option<&str> {
        match self {
            JobPayload::ParseDocument { doc_id } => Some(doc_id),
            JobPayload::RebuildIndex { .. } => None,
        }
    }
}

/// A claimed job with its decoded payload
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub job: Job,
    pub payload: JobPayload,
}

/// Queue handle. Cheap to clone; shares the underlying pool
#[derive(Clone)]
pub struct JobQueue {
    db: MetaDb,
    lease_secs: i64,
    max_attempts: i64,
}

impl JobQueue {
    pub fn new(db: MetaDb, lease_secs: i64, max_attempts: i64) -> Self {
        Self {
            db,
            lease_secs,
            max_attempts,
        }
    }

    /// Enqueue a new pending job and return its id
    pub async fn enqueue(&self, workspace_id: &str, payload: &JobPayload) -> Result<String> {
        let now = Utc::now().to_rfc3339();
        let job = Job {
            id: Uuid::new_v4().to_string(),
            workspace_id: workspace_id.to_string(),
            doc_id: payload.doc_id().map(String::from),
            job_type: payload.job_type().to_string(),
            payload_json: serde_json::to_string(payload)?,
            status: JobStatus::Pending.to_string(),
            attempt: 0,
            max_attempt: self.max_attempts,
            progress: 0,
            error: None,
            worker_id: None,
            lease_expires_at: None,
            not_before: 0,
            created_at: now.clone(),
            updated_at: now,
        };

        self.db.insert_job(&job).await?;
        debug!(job_id = %job.id, job_type = %job.job_type, "Enqueued job");
        Ok(job.id)
    }

    /// Claim the oldest eligible job, if any
    pub async fn claim(&self, worker_id: &str) -> Result<Option<ClaimedJob>> {
        let now = Utc::now().timestamp();
        let Some(job) = self.db.claim_job(worker_id, now, self.lease_secs).await? else {
            return Ok(None);
        };

        let payload: JobPayload = match serde_json::from_str(&job.payload_json) {
            Ok(p) => p,
            Err(e) => {
                // An undecodable payload can never succeed; park it
                warn!(job_id = %job.id, "Unreadable job payload: {}", e);
                self.db
                    .fail_job_terminal(&job.id, &format!("unreadable payload: {}", e))
                    .await?;
                return Err(Error::Consistency(format!(
                    "job {} has unreadable payload",
                    job.id
                )));
            }
        };

        Ok(Some(ClaimedJob { job, payload }))
    }

    /// Mark a job done
    pub async fn complete(&self, job_id: &str) -> Result<()> {
        self.db.complete_job(job_id).await
    }

    /// Record a transient failure. Retries get an exponential backoff floor
    /// so a flapping dependency does not hot-spin the workers
    pub async fn fail(&self, job_id: &str, attempt: i64, error: &str) -> Result<JobOutcome> {
        let not_before = Utc::now().timestamp() + retry_backoff_secs(attempt);
        self.db.fail_job(job_id, error, not_before).await
    }

    /// Record a structural failure: out of the queue immediately, no matter
    /// how many attempts remain
    pub async fn fail_terminal(&self, job_id: &str, error: &str) -> Result<()> {
        self.db.fail_job_terminal(job_id, error).await
    }

    /// Extend a long-running job's lease
    pub async fn touch(&self, job_id: &str) -> Result<()> {
        let expires = Utc::now().timestamp() + self.lease_secs;
        self.db.touch_job_lease(job_id, expires).await
    }

    /// Update advisory progress (0-100)
    pub async fn set_progress(&self, job_id: &str, progress: i64) -> Result<()> {
        self.db.set_job_progress(job_id, progress).await
    }

    /// Fetch a job by id
    pub async fn get(&self, job_id: &str) -> Result<Option<Job>> {
        self.db.get_job(job_id).await
    }

    /// Count jobs in a given state
    pub async fn count_by_status(&self, status: JobStatus) -> Result<i64> {
        self.db.count_jobs_by_status(status).await
    }
}

/// Backoff floor before the next attempt: 5s doubling per prior attempt,
/// capped at 5 minutes
fn retry_backoff_secs(attempt: i64) -> i64 {
    let shift = attempt.clamp(0, 6) as u32;
    (5i64 << shift).min(300)
}
