//! Bounded-concurrency task runner (component H). Both the snapshot phase
//! and the sync phase fan out across the cross-product of volumes ×
//! subvolumes × mirrors through one of these; `concurrency` in the
//! top-level config sets the worker count.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::{mpsc, Mutex, Notify};

type BoxedTask = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// Runs pushed tasks across a fixed number of worker loops. `push` never
/// blocks; `wait` drains until every pushed task has completed (or one
/// failed), returning the first error observed across all of them.
///
/// Once `wait` has been called, tasks pushed afterward are not guaranteed
/// to run: the queue has already begun tearing down its workers.
pub struct ConcurrencyQueue {
    sender: mpsc::UnboundedSender<BoxedTask>,
    workers: Vec<tokio::task::JoinHandle<()>>,
    first_error: Arc<Mutex<Option<anyhow::Error>>>,
    aborted: Arc<Notify>,
}

impl ConcurrencyQueue {
    /// `concurrency` is clamped to at least 1; zero would mean no task ever
    /// runs.
    pub fn new(concurrency: usize) -> Self {
        let concurrency = concurrency.max(1);
        let (sender, receiver) = mpsc::unbounded_channel::<BoxedTask>();
        let receiver = Arc::new(Mutex::new(receiver));
        let first_error = Arc::new(Mutex::new(None));
        let aborted = Arc::new(Notify::new());

        let workers = (0..concurrency)
            .map(|_| {
                let receiver = Arc::clone(&receiver);
                let first_error = Arc::clone(&first_error);
                let aborted = Arc::clone(&aborted);
                tokio::spawn(async move {
                    loop {
                        let task = {
                            let mut receiver = receiver.lock().await;
                            receiver.recv().await
                        };
                        let task = match task {
                            Some(task) => task,
                            None => break,
                        };
                        if first_error.lock().await.is_some() {
                            continue;
                        }
                        if let Err(e) = task.await {
                            let mut slot = first_error.lock().await;
                            if slot.is_none() {
                                *slot = Some(e);
                                aborted.notify_waiters();
                            }
                        }
                    }
                })
            })
            .collect();

        Self {
            sender,
            workers,
            first_error,
            aborted,
        }
    }

    /// Non-blocking: the task runs on whichever worker next becomes free,
    /// in arbitrary order relative to other pushed tasks.
    pub fn push<F>(&self, task: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        // A closed receiver (all workers already stopped) just drops the
        // task silently; this can only happen after `wait` has returned,
        // which the caller was already told voids the scheduling guarantee.
        let _ = self.sender.send(Box::pin(task));
    }

    /// Closes the queue to further scheduling and waits for every worker to
    /// drain, returning the first error observed across all tasks (if any).
    pub async fn wait(self) -> Result<()> {
        drop(self.sender);
        for worker in self.workers {
            let _ = worker.await;
        }
        let mut slot = self.first_error.lock().await;
        match slot.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn runs_every_task_and_succeeds_with_no_errors() {
        let queue = ConcurrencyQueue::new(4);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..20 {
            let counter = Arc::clone(&counter);
            queue.push(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }
        queue.wait().await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 20);
    }

    #[tokio::test]
    async fn reports_first_error() {
        let queue = ConcurrencyQueue::new(2);
        queue.push(async { Ok(()) });
        queue.push(async { anyhow::bail!("task failed") });
        queue.push(async { Ok(()) });
        let result = queue.wait().await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn respects_bounded_concurrency() {
        let queue = ConcurrencyQueue::new(2);
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        for _ in 0..8 {
            let in_flight = Arc::clone(&in_flight);
            let max_seen = Arc::clone(&max_seen);
            queue.push(async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            });
        }
        queue.wait().await.unwrap();
        assert!(max_seen.load(Ordering::SeqCst) <= 2);
    }
}
