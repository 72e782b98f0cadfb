//! # Request queue
//!
//! Every outbound call (backend API, snapshot fetch, GitHub) goes through one
//! [`RequestQueue`]. Operations run strictly one at a time in admission order, with a
//! fixed pause after each one settles.
//!
//! | Property | Behaviour |
//! |----------|-----------|
//! | Admission | When [`RequestQueue::enqueue`] is called, not when its future is first polled. |
//! | Concurrency | One operation at a time per queue. |
//! | Spacing | `delay` after every operation, success, error or panic alike. |
//! | Delivery | Every admitted operation runs exactly once, even if its caller stopped waiting. |
//!
//! A panicking operation resolves its caller with [`ApiError::Aborted`] and the
//! worker moves on to the next one.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::{mpsc, oneshot};

use crate::ApiError;

type Job = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

#[derive(Clone, Debug)]
pub struct RequestQueue {
    tx: mpsc::UnboundedSender<Job>,
    delay: Duration,
}

impl RequestQueue {
    /// Spawns the worker on the current tokio runtime.
    pub fn new(delay: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run(rx, delay));
        Self { tx, delay }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn enqueue<F, Fut, T>(
        &self,
        operation: F,
    ) -> impl Future<Output = Result<T, ApiError>> + Send + 'static
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
        T: Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel();
        let job: Job = Box::new(move || {
            async move {
                let result = operation().await;
                // The caller may have gone away; the work still happened.
                let _ = done_tx.send(result);
            }
            .boxed()
        });
        let admitted = self.tx.send(job).is_ok();

        async move {
            if !admitted {
                return Err(ApiError::QueueClosed);
            }
            match done_rx.await {
                Ok(result) => result,
                Err(_) => Err(ApiError::Aborted),
            }
        }
    }
}

async fn run(mut rx: mpsc::UnboundedReceiver<Job>, delay: Duration) {
    while let Some(job) = rx.recv().await {
        if AssertUnwindSafe(job()).catch_unwind().await.is_err() {
            tracing::error!("queued operation panicked");
        }
        tokio::time::sleep(delay).await;
    }
    tracing::debug!("request queue drained and closed");
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    use tokio::time::Instant;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_runs_in_order_with_spacing() {
        let queue = RequestQueue::new(Duration::from_millis(150));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let start = Instant::now();

        let pending: Vec<_> = (0..5)
            .map(|i| {
                let seen = seen.clone();
                queue.enqueue(move || async move {
                    seen.lock().unwrap().push((i, Instant::now()));
                    Ok::<_, ApiError>(i)
                })
            })
            .collect();
        let results = futures::future::join_all(pending).await;

        let values: Vec<_> = results.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(values, vec![0, 1, 2, 3, 4]);

        let seen = seen.lock().unwrap();
        let order: Vec<_> = seen.iter().map(|(i, _)| *i).collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
        for pair in seen.windows(2) {
            assert!(pair[1].1 - pair[0].1 >= Duration::from_millis(150));
        }
        assert!(start.elapsed() >= Duration::from_millis(4 * 150));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_and_panic_do_not_block() {
        let queue = RequestQueue::new(Duration::from_millis(10));

        let failed = queue.enqueue(|| async { Err::<(), _>(ApiError::Network("down".into())) });
        let panicked = queue.enqueue(|| async {
            if true {
                panic!("boom");
            }
            Ok::<(), ApiError>(())
        });
        let fine = queue.enqueue(|| async { Ok::<_, ApiError>("ok") });

        assert!(matches!(failed.await, Err(ApiError::Network(_))));
        assert!(matches!(panicked.await, Err(ApiError::Aborted)));
        assert_eq!(fine.await.unwrap(), "ok");
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_callers_still_run() {
        let queue = RequestQueue::new(Duration::from_millis(10));
        let ran = Arc::new(AtomicBool::new(false));

        let flag = ran.clone();
        drop(queue.enqueue(move || async move {
            flag.store(true, Ordering::SeqCst);
            Ok::<(), ApiError>(())
        }));

        queue
            .enqueue(|| async { Ok::<(), ApiError>(()) })
            .await
            .unwrap();
        assert!(ran.load(Ordering::SeqCst));
    }
}
