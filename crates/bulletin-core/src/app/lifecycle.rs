//! Lifecycle - プロセス内のバックグラウンド処理の寿命
//!
//! Every background unit (presence watcher, converge loop, task runs) is
//! spawned through a [`Lifecycle`]. Shutdown cancels the shared token, stops
//! accepting new work and waits until everything spawned has finished.

use std::future::Future;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::debug;

/// Lifecycle handle; clones share the same token and tracker.
#[derive(Debug, Clone, Default)]
pub struct Lifecycle {
    token: CancellationToken,
    tracker: TaskTracker,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token cancelled on shutdown. Loops `select!` on `token.cancelled()`.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Spawn tracked work.
    ///
    /// Work spawned after shutdown started still runs and is still waited for;
    /// callers that must not start late work check `is_shutting_down` first.
    pub fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tracker.spawn(fut);
    }

    /// Request shutdown without waiting.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Cancel and wait until all tracked work has drained.
    pub async fn shutdown(&self) {
        self.token.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        debug!("lifecycle drained");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn shutdown_waits_for_tracked_work() {
        let lifecycle = Lifecycle::new();
        let finished = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let token = lifecycle.token();
            let finished = finished.clone();
            lifecycle.spawn(async move {
                token.cancelled().await;
                tokio::time::sleep(Duration::from_millis(5)).await;
                finished.fetch_add(1, Ordering::SeqCst);
            });
        }

        lifecycle.shutdown().await;
        assert_eq!(finished.load(Ordering::SeqCst), 3);
        assert!(lifecycle.is_shutting_down());
    }

    #[tokio::test]
    async fn cancel_is_visible_to_clones() {
        let lifecycle = Lifecycle::new();
        let clone = lifecycle.clone();
        clone.cancel();
        assert!(lifecycle.is_shutting_down());
        lifecycle.shutdown().await;
    }
}
