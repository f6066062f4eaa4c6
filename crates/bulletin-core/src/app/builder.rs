//! BbsBuilder - Bbs の構築とワイヤリング
//!
//! # Fail-fast 設計
//! - the store has no sensible default and must be given explicitly
//! - everything else falls back to the production implementation
//!   (`SystemClock`, `TracingEventSink`, `NoopNotifier`, 1s retry backoff)
//! - `build()` returns `BuildError` instead of panicking on a missing piece

use std::sync::Arc;

use crate::bbs::{Bbs, RetryPolicy};
use crate::config::BulletinConfig;
use crate::impls::NoopNotifier;
use crate::ports::{Clock, EventSink, StoreAdapter, SystemClock, TaskNotifier, TracingEventSink};

/// BbsBuilder は Bbs を構築
///
/// # 使用例
/// ```ignore
/// let bbs = BbsBuilder::new()
///     .store(Arc::new(InMemoryStore::new()))
///     .notifier(Arc::new(notifier))
///     .build()?;
/// ```
#[derive(Default)]
pub struct BbsBuilder {
    store: Option<Arc<dyn StoreAdapter>>,
    clock: Option<Arc<dyn Clock>>,
    notifier: Option<Arc<dyn TaskNotifier>>,
    events: Option<Arc<dyn EventSink>>,
    retry: Option<RetryPolicy>,
}

/// BuildError は構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("no store configured: call BbsBuilder::store before build")]
    MissingStore,
}

impl BbsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(mut self, store: Arc<dyn StoreAdapter>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn TaskNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Apply the store-related settings of a configuration.
    pub fn config(self, config: &BulletinConfig) -> Self {
        self.retry_policy(RetryPolicy::new(config.store_retry_backoff()))
    }

    pub fn build(self) -> Result<Bbs, BuildError> {
        let store = self.store.ok_or(BuildError::MissingStore)?;
        Ok(Bbs::new(
            store,
            self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            self.notifier.unwrap_or_else(|| Arc::new(NoopNotifier)),
            self.events.unwrap_or_else(|| Arc::new(TracingEventSink)),
            self.retry.unwrap_or_default(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::domain::{Task, TaskGuid};
    use crate::impls::InMemoryStore;
    use crate::ports::{RecordingEventSink, StoreError};

    #[test]
    fn build_without_store_fails() {
        let res = BbsBuilder::new().build();
        assert!(matches!(res, Err(BuildError::MissingStore)));
    }

    #[tokio::test]
    async fn build_with_defaults_is_usable() {
        let store = InMemoryStore::new();
        let bbs = BbsBuilder::new().store(Arc::new(store.clone())).build().unwrap();

        let mut task = Task::new(TaskGuid::new("a"), "stack", 1, 1, vec![]);
        bbs.desire(&mut task).await.unwrap();
        assert!(task.created_at > 0);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn config_sets_the_retry_backoff() {
        let store = InMemoryStore::new();
        let config = BulletinConfig {
            store_retry_backoff_ms: 250,
            ..BulletinConfig::default()
        };
        let bbs = BbsBuilder::new()
            .store(Arc::new(store.clone()))
            .event_sink(Arc::new(RecordingEventSink::new()))
            .config(&config)
            .build()
            .unwrap();

        store.inject_failures([StoreError::Timeout, StoreError::Timeout]);
        let started = tokio::time::Instant::now();
        let mut task = Task::new(TaskGuid::new("a"), "stack", 1, 1, vec![]);
        bbs.desire(&mut task).await.unwrap();
        assert_eq!(started.elapsed(), Duration::from_millis(500));
    }
}
