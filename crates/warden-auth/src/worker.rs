//! Periodic background workers owned by evaluators
//!
//! Some evaluator kinds keep local state fresh in the background (OIDC
//! discovery, API key Secrets, external Rego policies). Each such task
//! is a [`Worker`]: a tokio task ticking at a fixed interval until its
//! stop token fires. Workers are owned by the evaluator that spawned
//! them and stopped by the evaluator's `clean`, which couples their
//! lifecycle to the owning config and keeps hot swaps leak-free.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

/// A periodic background task with a stop token
#[derive(Debug)]
pub struct Worker {
    name: String,
    token: CancellationToken,
}

impl Worker {
    /// Spawn a worker invoking `work` every `interval`
    ///
    /// The first invocation happens one interval after spawn; initial
    /// state is loaded by the evaluator's constructor, not the worker.
    pub fn spawn<F, Fut>(name: impl Into<String>, interval: Duration, mut work: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let token = CancellationToken::new();

        let task_name = name.clone();
        let task_token = token.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The interval fires immediately once; consume that tick
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = task_token.cancelled() => {
                        debug!(worker = %task_name, "Background worker stopped");
                        break;
                    }
                    _ = ticker.tick() => work().await,
                }
            }
        });

        Self { name, token }
    }

    /// Worker name, for logging
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stop the worker; idempotent
    pub fn stop(&self) {
        self.token.cancel();
    }

    /// Whether the worker has been stopped
    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_worker_ticks_periodically() {
        let count = Arc::new(AtomicU64::new(0));
        let probe = count.clone();
        let _worker = Worker::spawn("ticker", Duration::from_secs(10), move || {
            let probe = probe.clone();
            async move {
                probe.fetch_add(1, Ordering::SeqCst);
            }
        });

        // Step the clock so each tick is observed before the next fires
        for _ in 0..3 {
            tokio::time::advance(Duration::from_secs(11)).await;
            tokio::task::yield_now().await;
        }
        assert!(count.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_halts_ticks() {
        let count = Arc::new(AtomicU64::new(0));
        let probe = count.clone();
        let worker = Worker::spawn("stoppable", Duration::from_secs(10), move || {
            let probe = probe.clone();
            async move {
                probe.fetch_add(1, Ordering::SeqCst);
            }
        });

        worker.stop();
        assert!(worker.is_stopped());

        tokio::time::advance(Duration::from_secs(60)).await;
        tokio::task::yield_now().await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        // Stopping again is a no-op
        worker.stop();
        assert!(worker.is_stopped());
    }

    #[tokio::test]
    async fn test_drop_cancels() {
        let worker = Worker::spawn("dropped", Duration::from_secs(10), || async {});
        let token_view = worker.is_stopped();
        assert!(!token_view);
        drop(worker);
        // The task observes the cancelled token and exits on its own
    }
}
