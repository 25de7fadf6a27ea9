//! Worker pool for the job queue
//!
//! Workers poll the queue, run each claimed job through a handler, and record
//! the outcome. Transient errors send the job back for retry with a backoff
//! floor; structural errors take it out of rotation immediately.

use super::{ClaimedJob, JobQueue};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Executes claimed jobs
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Run one job to completion
    async fn handle(&self, claimed: &ClaimedJob) -> Result<()>;

    /// Called once when a job leaves the queue without ever succeeding,
    /// so dependent state (e.g. the document row) can be marked failed
    async fn on_terminal_failure(&self, claimed: &ClaimedJob, error: &str) -> Result<()>;
}

/// A pool of polling workers
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    shutdown_tx: watch::Sender<bool>,
}

impl WorkerPool {
    /// Spawn `count` workers polling at `poll_interval`
    pub fn spawn(
        queue: JobQueue,
        handler: Arc<dyn JobHandler>,
        count: usize,
        poll_interval: Duration,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handles = (0..count)
            .map(|i| {
                let worker_id = format!("worker-{}", i);
                let queue = queue.clone();
                let handler = handler.clone();
                let shutdown_rx = shutdown_rx.clone();
                tokio::spawn(async move {
                    run_worker(worker_id, queue, handler, poll_interval, shutdown_rx).await;
                })
            })
            .collect();

        info!("Started {} ingestion workers", count);

        Self {
            handles,
            shutdown_tx,
        }
    }

    /// Signal shutdown and wait for in-flight jobs to finish
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!("Worker task panicked: {}", e);
            }
        }
        info!("Worker pool stopped");
    }
}

async fn run_worker(
    worker_id: String,
    queue: JobQueue,
    handler: Arc<dyn JobHandler>,
    poll_interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    debug!("{} started", worker_id);

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        match queue.claim(&worker_id).await {
            Ok(Some(claimed)) => {
                // Finish the claimed job even if shutdown arrives mid-run
                process_claimed(&queue, handler.as_ref(), &claimed).await;
            }
            Ok(None) => {
                tokio::select! {
                    _ = tokio::time::sleep(poll_interval) => {}
                    _ = shutdown_rx.changed() => {}
                }
            }
            Err(e) => {
                warn!("{} failed to claim a job: {}", worker_id, e);
                tokio::select! {
                    _ = tokio::time::sleep(poll_interval) => {}
                    _ = shutdown_rx.changed() => {}
                }
            }
        }
    }

    debug!("{} stopped", worker_id);
}

async fn process_claimed(queue: &JobQueue, handler: &dyn JobHandler, claimed: &ClaimedJob) {
    let job_id = &claimed.job.id;
    debug!(job_id = %job_id, job_type = %claimed.job.job_type, "Running job");

    match handler.handle(claimed).await {
        Ok(()) => {
            if let Err(e) = queue.complete(job_id).await {
                error!(job_id = %job_id, "Failed to mark job completed: {}", e);
            }
        }
        Err(e) if e.is_transient() => {
            let message = e.to_string();
            warn!(job_id = %job_id, "Job attempt failed (transient): {}", message);
            match queue.fail(job_id, claimed.job.attempt, &message).await {
                Ok(super::JobOutcome::Retrying { attempt }) => {
                    debug!(job_id = %job_id, attempt, "Job will be retried");
                }
                Ok(super::JobOutcome::TerminallyFailed) => {
                    if let Err(e) = handler.on_terminal_failure(claimed, &message).await {
                        error!(job_id = %job_id, "Terminal-failure hook failed: {}", e);
                    }
                }
                Err(e) => error!(job_id = %job_id, "Failed to record job failure: {}", e),
            }
        }
        Err(e) => {
            // Structural: re-running the same bytes would reproduce it
            let message = e.to_string();
            warn!(job_id = %job_id, "Job failed (structural): {}", message);
            if let Err(e) = queue.fail_terminal(job_id, &message).await {
                error!(job_id = %job_id, "Failed to park job: {}", e);
            }
            if let Err(e) = handler.on_terminal_failure(claimed, &message).await {
                error!(job_id = %job_id, "Terminal-failure hook failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::jobs::JobPayload;
    use crate::meta::{Document, JobStatus, MetaDb};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct CountingHandler {
        handled: AtomicUsize,
        terminal: AtomicUsize,
        fail_with: Option<fn() -> Error>,
    }

    impl CountingHandler {
        fn succeeding() -> Self {
            Self {
                handled: AtomicUsize::new(0),
                terminal: AtomicUsize::new(0),
                fail_with: None,
            }
        }

        fn failing(f: fn() -> Error) -> Self {
            Self {
                handled: AtomicUsize::new(0),
                terminal: AtomicUsize::new(0),
                fail_with: Some(f),
            }
        }
    }

    #[async_trait]
    impl JobHandler for CountingHandler {
        async fn handle(&self, _claimed: &ClaimedJob) -> Result<()> {
            self.handled.fetch_add(1, Ordering::SeqCst);
            match self.fail_with {
                Some(f) => Err(f()),
                None => Ok(()),
            }
        }

        async fn on_terminal_failure(&self, _claimed: &ClaimedJob, _error: &str) -> Result<()> {
            self.terminal.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    async fn setup() -> (JobQueue, MetaDb, TempDir) {
        let tmp = TempDir::new().unwrap();
        let db = MetaDb::new(&tmp.path().join("test.db")).await.unwrap();
        let queue = JobQueue::new(db.clone(), 300, 3);
        (queue, db, tmp)
    }

    async fn enqueue_parse(queue: &JobQueue, db: &MetaDb, hash: &str) -> String {
        let doc = Document::new(
            "ws1".to_string(),
            "paper.pdf".to_string(),
            "local://ws1/paper.pdf".to_string(),
            100,
            hash.to_string(),
        );
        db.insert_document(&doc).await.unwrap();
        queue
            .enqueue("ws1", &JobPayload::ParseDocument { doc_id: doc.id })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_successful_job_is_completed() {
        let (queue, db, _tmp) = setup().await;
        let job_id = enqueue_parse(&queue, &db, "h1").await;
        let handler = CountingHandler::succeeding();

        let claimed = queue.claim("w").await.unwrap().unwrap();
        process_claimed(&queue, &handler, &claimed).await;

        assert_eq!(handler.handled.load(Ordering::SeqCst), 1);
        let stored = queue.get(&job_id).await.unwrap().unwrap();
        assert_eq!(stored.get_status().unwrap(), JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_structural_error_parks_job_and_fires_hook() {
        let (queue, db, _tmp) = setup().await;
        let job_id = enqueue_parse(&queue, &db, "h2").await;
        let handler =
            CountingHandler::failing(|| Error::InvalidDocument("missing PDF magic".to_string()));

        let claimed = queue.claim("w").await.unwrap().unwrap();
        process_claimed(&queue, &handler, &claimed).await;

        assert_eq!(handler.terminal.load(Ordering::SeqCst), 1);
        let stored = queue.get(&job_id).await.unwrap().unwrap();
        assert_eq!(stored.get_status().unwrap(), JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_transient_error_requeues_without_hook() {
        let (queue, db, _tmp) = setup().await;
        let job_id = enqueue_parse(&queue, &db, "h3").await;
        let handler = CountingHandler::failing(|| Error::Index("connection refused".to_string()));

        let claimed = queue.claim("w").await.unwrap().unwrap();
        process_claimed(&queue, &handler, &claimed).await;

        assert_eq!(handler.terminal.load(Ordering::SeqCst), 0);
        let stored = queue.get(&job_id).await.unwrap().unwrap();
        assert_eq!(stored.get_status().unwrap(), JobStatus::Pending);
        assert_eq!(stored.attempt, 1);
    }

    #[tokio::test]
    async fn test_transient_exhaustion_fires_hook() {
        let (queue, db, _tmp) = setup().await;
        let db2 = db.clone();
        let queue = JobQueue::new(db2, 300, 1);
        let job_id = enqueue_parse(&queue, &db, "h4").await;
        let handler = CountingHandler::failing(|| Error::Index("connection refused".to_string()));

        let claimed = queue.claim("w").await.unwrap().unwrap();
        process_claimed(&queue, &handler, &claimed).await;

        assert_eq!(handler.terminal.load(Ordering::SeqCst), 1);
        let stored = queue.get(&job_id).await.unwrap().unwrap();
        assert_eq!(stored.get_status().unwrap(), JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_pool_drains_queue_and_shuts_down() {
        let (queue, db, _tmp) = setup().await;
        for i in 0..4 {
            enqueue_parse(&queue, &db, &format!("h-{}", i)).await;
        }

        let handler = Arc::new(CountingHandler::succeeding());
        let pool = WorkerPool::spawn(
            queue.clone(),
            handler.clone(),
            2,
            Duration::from_millis(10),
        );

        // Give the workers time to drain
        for _ in 0..100 {
            if queue.count_by_status(JobStatus::Completed).await.unwrap() == 4 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        pool.shutdown().await;

        assert_eq!(queue.count_by_status(JobStatus::Completed).await.unwrap(), 4);
        assert_eq!(handler.handled.load(Ordering::SeqCst), 4);
    }
}
