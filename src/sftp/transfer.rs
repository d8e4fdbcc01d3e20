//! Transfer Queue for SFTP operations
//!
//! Bounded-concurrency task runner used for every multi-path operation.
//! At most `limit` tasks run at once; the rest wait in FIFO order. A failed
//! task never cancels its siblings: the queue drains completely and
//! [`TransferQueue::wait_until_idle`] reports every failure at once.

use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, warn};

use super::error::{BatchError, SftpError, TransferTaskError};
use crate::config::MAX_TRANSFER_CONCURRENCY;

struct QueuedTask {
    label: String,
    task: BoxFuture<'static, Result<(), SftpError>>,
}

#[derive(Default)]
struct QueueState {
    backlog: VecDeque<QueuedTask>,
    running: usize,
    settled: usize,
    failures: Vec<TransferTaskError>,
}

impl QueueState {
    fn is_idle(&self) -> bool {
        self.running == 0 && self.backlog.is_empty()
    }
}

struct QueueInner {
    limit: usize,
    state: Mutex<QueueState>,
    idle: Notify,
}

/// Cloneable handle to one queue. Tasks may hold a clone and enqueue more
/// work; it is awaited by the same `wait_until_idle` call.
#[derive(Clone)]
pub struct TransferQueue {
    inner: Arc<QueueInner>,
}

impl TransferQueue {
    pub fn new(limit: usize) -> Self {
        let limit = limit.clamp(1, MAX_TRANSFER_CONCURRENCY);
        Self {
            inner: Arc::new(QueueInner {
                limit,
                state: Mutex::new(QueueState::default()),
                idle: Notify::new(),
            }),
        }
    }

    pub fn limit(&self) -> usize {
        self.inner.limit
    }

    /// Enqueue a unit of work. It starts immediately when below the limit.
    pub fn add<F>(&self, label: impl Into<String>, task: F)
    where
        F: Future<Output = Result<(), SftpError>> + Send + 'static,
    {
        let label = label.into();
        debug!("Queueing transfer task: {}", label);
        let mut state = self.inner.state.lock();
        state.backlog.push_back(QueuedTask {
            label,
            task: Box::pin(task),
        });
        Self::pump(&self.inner, &mut state);
    }

    /// Resolve once every task (including ones added while waiting) settled.
    ///
    /// Returns the number of settled tasks, or a [`SftpError::Batch`] holding
    /// each failure. The failure list is reset so the queue can be reused.
    pub async fn wait_until_idle(&self) -> Result<usize, SftpError> {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.inner.state.lock();
                if state.is_idle() {
                    let settled = std::mem::take(&mut state.settled);
                    let failures = std::mem::take(&mut state.failures);
                    if failures.is_empty() {
                        return Ok(settled);
                    }
                    return Err(SftpError::Batch(BatchError { failures, settled }));
                }
            }

            notified.await;
        }
    }

    /// Start backlog tasks while below the limit. Called with the state locked.
    fn pump(inner: &Arc<QueueInner>, state: &mut QueueState) {
        while state.running < inner.limit {
            let Some(QueuedTask { label, task }) = state.backlog.pop_front() else {
                break;
            };
            state.running += 1;

            let inner = inner.clone();
            tokio::spawn(async move {
                let result = match AssertUnwindSafe(task).catch_unwind().await {
                    Ok(result) => result,
                    Err(_) => Err(SftpError::ProtocolError("transfer task panicked".to_string())),
                };
                Self::finish(&inner, label, result);
            });
        }
    }

    fn finish(inner: &Arc<QueueInner>, label: String, result: Result<(), SftpError>) {
        let mut state = inner.state.lock();
        state.running -= 1;
        state.settled += 1;

        if let Err(source) = result {
            warn!("Transfer task failed: {}: {}", label, source);
            state.failures.push(TransferTaskError { label, source });
        }

        Self::pump(inner, &mut state);

        if state.is_idle() {
            inner.idle.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    #[tokio::test]
    async fn test_empty_queue_is_idle() {
        let queue = TransferQueue::new(5);
        assert_eq!(queue.wait_until_idle().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_limit_is_clamped() {
        assert_eq!(TransferQueue::new(0).limit(), 1);
        assert_eq!(TransferQueue::new(10_000).limit(), MAX_TRANSFER_CONCURRENCY);
    }

    #[tokio::test]
    async fn test_never_exceeds_limit() {
        let queue = TransferQueue::new(5);
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let spans = Arc::new(Mutex::new(Vec::new()));

        for i in 0..20u64 {
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            let spans = spans.clone();
            queue.add(format!("task {}", i), async move {
                let start = Instant::now();
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5 + (i % 3) * 5)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                spans.lock().push((start, Instant::now()));
                Ok(())
            });
        }

        assert_eq!(queue.wait_until_idle().await.unwrap(), 20);
        assert_eq!(peak.load(Ordering::SeqCst), 5);

        // No instant is covered by more than five task spans
        let spans = spans.lock().clone();
        assert_eq!(spans.len(), 20);
        for (start, _) in &spans {
            let overlapping = spans
                .iter()
                .filter(|(s, e)| s <= start && start < e)
                .count();
            assert!(overlapping <= 5, "{} tasks overlapped", overlapping);
        }
    }

    #[tokio::test]
    async fn test_starts_in_fifo_order() {
        let queue = TransferQueue::new(1);
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..6 {
            let order = order.clone();
            queue.add(format!("task {}", i), async move {
                order.lock().push(i);
                tokio::task::yield_now().await;
                Ok(())
            });
        }
        queue.wait_until_idle().await.unwrap();
        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_failure_does_not_cancel_siblings() {
        let queue = TransferQueue::new(2);
        let done = Arc::new(AtomicUsize::new(0));
        for i in 0..5 {
            let done = done.clone();
            queue.add(format!("put /tmp/{}", i), async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                if i == 1 {
                    return Err(SftpError::PermissionDenied("/tmp/1".into()));
                }
                done.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }

        let err = queue.wait_until_idle().await.unwrap_err();
        assert_eq!(done.load(Ordering::SeqCst), 4);
        match err {
            SftpError::Batch(batch) => {
                assert_eq!(batch.settled, 5);
                assert_eq!(batch.failures.len(), 1);
                assert_eq!(batch.failures[0].label, "put /tmp/1");
            }
            other => panic!("unexpected error: {other}"),
        }

        // Failures were consumed; the queue is reusable
        assert_eq!(queue.wait_until_idle().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_tasks_added_while_waiting_are_awaited() {
        let queue = TransferQueue::new(2);
        let ran = Arc::new(AtomicUsize::new(0));

        let inner_queue = queue.clone();
        let inner_ran = ran.clone();
        queue.add("parent", async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            let ran = inner_ran.clone();
            inner_queue.add("child", async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                ran.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
            inner_ran.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        assert_eq!(queue.wait_until_idle().await.unwrap(), 2);
        assert_eq!(ran.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_panicking_task_settles_its_slot() {
        let queue = TransferQueue::new(1);
        let done = Arc::new(AtomicUsize::new(0));
        for i in 0..3 {
            let done = done.clone();
            queue.add(format!("mkdir /srv/{}", i), async move {
                if i == 0 {
                    panic!("remote went away");
                }
                done.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }

        match queue.wait_until_idle().await.unwrap_err() {
            SftpError::Batch(batch) => {
                assert_eq!(batch.settled, 3);
                assert_eq!(batch.failures.len(), 1);
                assert_eq!(batch.failures[0].label, "mkdir /srv/0");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(done.load(Ordering::SeqCst), 2);
    }
}
