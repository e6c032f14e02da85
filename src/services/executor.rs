use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{oneshot, Mutex};
use tracing::{info, warn};

use crate::config::ExecutorConfig;
use crate::errors::ServiceError;

/// Queue depth beyond which the executor is reported unhealthy.
pub const QUEUE_DEPTH_UNHEALTHY_THRESHOLD: u64 = 10;

/// Result of waiting on a gateway operation.
#[derive(Debug)]
pub enum ExecutionOutcome<T> {
    Completed(T),
    /// The operation was still running when the caller's timeout elapsed.
    /// The background task keeps going and applies its result when done;
    /// the caller must surface "already in progress" and never resubmit.
    InProgress,
}

type Job = BoxFuture<'static, ()>;

/// Bounded worker pool isolating slow gateway calls from the request path.
/// Workers run for the life of the process; dropping the executor closes the
/// channel and lets them drain out.
pub struct CardExecutor {
    sender: mpsc::Sender<Job>,
    queue_depth: Arc<AtomicU64>,
    worker_count: usize,
}

impl CardExecutor {
    pub fn start(config: &ExecutorConfig) -> Self {
        let (sender, receiver) = mpsc::channel::<Job>(config.queue_capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        let queue_depth = Arc::new(AtomicU64::new(0));

        for worker in 0..config.worker_count.max(1) {
            let receiver = Arc::clone(&receiver);
            let queue_depth = Arc::clone(&queue_depth);
            tokio::spawn(async move {
                loop {
                    let job = { receiver.lock().await.recv().await };
                    match job {
                        Some(job) => {
                            queue_depth.fetch_sub(1, Ordering::SeqCst);
                            job.await;
                        }
                        None => {
                            info!(worker, "card executor worker stopping");
                            break;
                        }
                    }
                }
            });
        }

        Self {
            sender,
            queue_depth,
            worker_count: config.worker_count.max(1),
        }
    }

    /// Submits `operation` to the pool and waits up to `timeout` for it.
    ///
    /// Returns [`ExecutionOutcome::InProgress`] when the timeout elapses
    /// first; the operation itself is never cancelled. A full queue rejects
    /// the submission with [`ServiceError::ExecutorQueueFull`].
    pub async fn execute<T, F>(
        &self,
        operation: F,
        timeout: Duration,
    ) -> Result<ExecutionOutcome<T>, ServiceError>
    where
        T: Send + 'static,
        F: Future<Output = T> + Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel();
        let job: Job = Box::pin(async move {
            let result = operation.await;
            // The receiver is gone when the caller timed out; the work is
            // already applied by the operation itself.
            let _ = done_tx.send(result);
        });

        self.queue_depth.fetch_add(1, Ordering::SeqCst);
        if let Err(err) = self.sender.try_send(job) {
            self.queue_depth.fetch_sub(1, Ordering::SeqCst);
            return match err {
                TrySendError::Full(_) => {
                    warn!("card executor queue is full, rejecting operation");
                    Err(ServiceError::ExecutorQueueFull)
                }
                TrySendError::Closed(_) => Err(ServiceError::InternalError(
                    "card executor is shut down".to_string(),
                )),
            };
        }

        match tokio::time::timeout(timeout, done_rx).await {
            Ok(Ok(result)) => Ok(ExecutionOutcome::Completed(result)),
            Ok(Err(_)) => Err(ServiceError::InternalError(
                "gateway operation task was dropped before completing".to_string(),
            )),
            Err(_) => Ok(ExecutionOutcome::InProgress),
        }
    }

    /// Jobs accepted but not yet picked up by a worker.
    pub fn queue_depth(&self) -> u64 {
        self.queue_depth.load(Ordering::SeqCst)
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn is_healthy(&self) -> bool {
        self.queue_depth() <= QUEUE_DEPTH_UNHEALTHY_THRESHOLD
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    fn executor(workers: usize, capacity: usize) -> CardExecutor {
        CardExecutor::start(&ExecutorConfig {
            worker_count: workers,
            queue_capacity: capacity,
            operation_timeout_ms: 1_000,
        })
    }

    #[tokio::test]
    async fn fast_operation_completes_with_its_result() {
        let executor = executor(2, 10);
        let outcome = executor
            .execute(async { 41 + 1 }, Duration::from_millis(500))
            .await
            .unwrap();
        assert!(matches!(outcome, ExecutionOutcome::Completed(42)));
    }

    #[tokio::test]
    async fn slow_operation_reports_in_progress_but_still_completes() {
        let executor = executor(1, 10);
        let finished = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&finished);

        let outcome = executor
            .execute(
                async move {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    flag.store(true, Ordering::SeqCst);
                },
                Duration::from_millis(10),
            )
            .await
            .unwrap();

        assert!(matches!(outcome, ExecutionOutcome::InProgress));
        assert!(!finished.load(Ordering::SeqCst));

        // The background task keeps running and applies its effect.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn full_queue_rejects_submission() {
        let executor = executor(1, 1);

        // One job occupying the single worker, one sitting in the queue.
        for _ in 0..2 {
            let _ = executor
                .execute(
                    async {
                        tokio::time::sleep(Duration::from_millis(200)).await;
                    },
                    Duration::from_millis(1),
                )
                .await
                .unwrap();
        }

        let result = executor
            .execute(async {}, Duration::from_millis(1))
            .await;
        assert!(matches!(result, Err(ServiceError::ExecutorQueueFull)));
    }

    #[tokio::test]
    async fn queue_depth_tracks_pending_jobs() {
        let executor = executor(1, 10);
        assert_eq!(executor.queue_depth(), 0);
        assert!(executor.is_healthy());

        let _ = executor
            .execute(
                async {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                },
                Duration::from_millis(1),
            )
            .await
            .unwrap();
        let _ = executor
            .execute(
                async {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                },
                Duration::from_millis(1),
            )
            .await
            .unwrap();

        assert!(executor.queue_depth() >= 1);
    }
}
