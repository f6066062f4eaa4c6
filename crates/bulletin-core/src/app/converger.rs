//! ConvergeLoop - 収束ループ
//!
//! Competes for the converge lock and, while holding it, runs a convergence
//! pass right after acquiring and then once per interval.

use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bbs::{Bbs, ConvergeConfig};
use crate::domain::{BbsError, BbsEvent};

pub struct ConvergeLoop {
    bbs: Bbs,
    holder: String,
    interval: Duration,
    config: ConvergeConfig,
}

impl ConvergeLoop {
    /// `interval` is both the pass period and the lock TTL.
    pub fn new(bbs: Bbs, holder: impl Into<String>, interval: Duration, config: ConvergeConfig) -> Self {
        Self {
            bbs,
            holder: holder.into(),
            interval,
            config,
        }
    }

    /// Run until `token` is cancelled or lock maintenance ends.
    ///
    /// Lock status is only read between passes: a pass already running when
    /// the lock expires finishes, and the loss is seen right after it. Its
    /// repairs are CAS writes, so they never clobber newer records.
    ///
    /// On cancellation the lock is released and its status stream drained
    /// before returning.
    pub async fn run(self, token: CancellationToken) -> Result<(), BbsError> {
        let (handle, mut status) = self
            .bbs
            .maintain_converge_lock(self.interval, &self.holder)
            .await?;

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut held = false;

        let cancelled = loop {
            tokio::select! {
                _ = token.cancelled() => break true,
                change = status.next() => match change {
                    Some(true) => {
                        held = true;
                        info!(holder = %self.holder, "converge lock acquired");
                        self.pass().await;
                        ticker.reset();
                    }
                    Some(false) => {
                        held = false;
                        self.bbs.emit(BbsEvent::warn("converge-lock.lost").with_key(self.holder.clone()));
                    }
                    None => break false,
                },
                _ = ticker.tick(), if held => self.pass().await,
            }
        };

        if cancelled {
            handle.release().await;
            status.drain().await;
        } else {
            warn!(holder = %self.holder, "converge lock maintenance ended");
        }
        Ok(())
    }

    async fn pass(&self) {
        let started = tokio::time::Instant::now();
        match self.bbs.converge(&self.config).await {
            Ok(report) => {
                debug!(?report, "pass report");
                self.bbs.emit(BbsEvent::info("converged").with_took(started.elapsed()));
            }
            Err(e) => self.bbs.emit(BbsEvent::error("converge.failed").with_error(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bbs::testing::{task, Fixture};
    use crate::domain::{ExecutorId, Task, TaskState};
    use crate::ports::{StoreAdapter, StoreNode};
    use crate::schema::{lock_schema_path, CONVERGE_LOCK_NAME};

    const INTERVAL: Duration = Duration::from_secs(10);

    async fn orphaned(fx: &Fixture, guid: &str) -> Task {
        let mut task = task(guid);
        fx.bbs.desire(&mut task).await.unwrap();
        fx.bbs.claim(&mut task, &ExecutorId::new("ghost")).await.unwrap();
        task
    }

    fn spawn(fx: &Fixture, holder: &str, token: CancellationToken) -> tokio::task::JoinHandle<Result<(), BbsError>> {
        let lp = ConvergeLoop::new(fx.bbs.clone(), holder, INTERVAL, ConvergeConfig::default());
        tokio::spawn(lp.run(token))
    }

    #[tokio::test(start_paused = true)]
    async fn holder_converges_and_releases_on_shutdown() {
        let fx = Fixture::new();
        let task = orphaned(&fx, "a").await;
        let token = CancellationToken::new();
        let join = spawn(&fx, "me", token.clone());

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(fx.stored(&task.guid).unwrap().state, TaskState::Completed);
        assert_eq!(fx.store.peek(&lock_schema_path(CONVERGE_LOCK_NAME)), Some(b"me".to_vec()));

        token.cancel();
        join.await.unwrap().unwrap();
        assert!(fx.store.peek(&lock_schema_path(CONVERGE_LOCK_NAME)).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn passes_repeat_every_interval() {
        let fx = Fixture::new();
        let token = CancellationToken::new();
        let join = spawn(&fx, "me", token.clone());
        tokio::time::sleep(Duration::from_millis(1)).await;

        // Appears after the first pass; picked up by the next tick.
        let task = orphaned(&fx, "late").await;
        tokio::time::sleep(INTERVAL).await;
        assert_eq!(fx.stored(&task.guid).unwrap().state, TaskState::Completed);

        token.cancel();
        join.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn no_passes_without_the_lock() {
        let fx = Fixture::new();
        let lock_key = lock_schema_path(CONVERGE_LOCK_NAME);
        fx.store
            .set(StoreNode::new(lock_key.clone(), b"other".to_vec()).with_ttl(Duration::from_secs(3600)))
            .await
            .unwrap();
        let task = orphaned(&fx, "a").await;

        let token = CancellationToken::new();
        let join = spawn(&fx, "me", token.clone());
        tokio::time::sleep(INTERVAL * 3).await;
        assert_eq!(fx.stored(&task.guid).unwrap().state, TaskState::Claimed);

        // The other holder goes away.
        fx.store.expire(&lock_key);
        tokio::time::sleep(INTERVAL).await;
        assert_eq!(fx.stored(&task.guid).unwrap().state, TaskState::Completed);

        token.cancel();
        join.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn losing_the_lock_stops_passes() {
        let fx = Fixture::new();
        let lock_key = lock_schema_path(CONVERGE_LOCK_NAME);
        let token = CancellationToken::new();
        let join = spawn(&fx, "me", token.clone());
        tokio::time::sleep(Duration::from_millis(1)).await;

        fx.store.expire(&lock_key);
        fx.store
            .set(StoreNode::new(lock_key.clone(), b"other".to_vec()).with_ttl(Duration::from_secs(3600)))
            .await
            .unwrap();
        tokio::time::sleep(INTERVAL).await;
        assert!(fx.events.names().contains(&"converge-lock.lost"));

        let task = orphaned(&fx, "a").await;
        tokio::time::sleep(INTERVAL * 3).await;
        assert_eq!(fx.stored(&task.guid).unwrap().state, TaskState::Claimed);

        token.cancel();
        join.await.unwrap().unwrap();
        assert_eq!(fx.store.peek(&lock_key), Some(b"other".to_vec()));
    }
}
