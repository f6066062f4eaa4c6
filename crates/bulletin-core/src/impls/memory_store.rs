//! InMemoryStore - 開発・テスト用の KV store
//!
//! # 実装詳細
//! - `BTreeMap<String, Entry>` を std `Mutex` で保護（await を跨いで保持しない）
//! - TTL は `tokio::time::Instant` で管理し、各操作の前に期限切れを掃除する
//!   （`tokio::time::pause()` したテストで時間を進められる）
//! - lease は keep-alive タスクが TTL の半分ごとに更新する
//! - `inject_failures` で次の操作を失敗させられる（timeout の再試行テスト用）

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::ports::store::{LeaseHandle, LeaseSubscription, StoreAdapter, StoreError, StoreNode};

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

#[derive(Debug, Default)]
struct Inner {
    entries: BTreeMap<String, Entry>,
    failures: VecDeque<StoreError>,
}

impl Inner {
    fn purge_expired(&mut self, now: Instant) {
        self.entries
            .retain(|_, entry| entry.expires_at.is_none_or(|at| at > now));
    }

    fn node(key: &str, entry: &Entry, now: Instant) -> StoreNode {
        StoreNode {
            key: key.to_string(),
            value: entry.value.clone(),
            ttl: entry.expires_at.map(|at| at.saturating_duration_since(now)),
        }
    }

    /// Take the key if it is free (or already ours) and push its expiry out.
    fn try_hold(&mut self, key: &str, value: &[u8], ttl: Duration) -> bool {
        let now = Instant::now();
        self.purge_expired(now);
        match self.entries.get_mut(key) {
            Some(entry) if entry.value != value => false,
            Some(entry) => {
                entry.expires_at = Some(now + ttl);
                true
            }
            None => {
                self.entries.insert(
                    key.to_string(),
                    Entry {
                        value: value.to_vec(),
                        expires_at: Some(now + ttl),
                    },
                );
                true
            }
        }
    }

    fn release_if_held(&mut self, key: &str, value: &[u8]) {
        if self.entries.get(key).is_some_and(|e| e.value == value) {
            self.entries.remove(key);
        }
    }
}

/// Single-process stand-in for the replicated store.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<Mutex<Inner>>,
}

fn poison_err<T>(_: PoisonError<T>) -> StoreError {
    StoreError::Unavailable("lock poisoned".to_string())
}

fn normalize(prefix: &str) -> &str {
    prefix.trim_end_matches('/')
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        self.inner.lock().map_err(poison_err)
    }

    /// Lock, purge expired keys and fail with the next injected error, if any.
    fn begin(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        let mut inner = self.lock()?;
        if let Some(err) = inner.failures.pop_front() {
            return Err(err);
        }
        inner.purge_expired(Instant::now());
        Ok(inner)
    }

    /// The next `n` store operations fail with these errors, in order.
    pub fn inject_failures(&self, errors: impl IntoIterator<Item = StoreError>) {
        if let Ok(mut inner) = self.lock() {
            inner.failures.extend(errors);
        }
    }

    /// Drop `key` as if its lease had lapsed.
    pub fn expire(&self, key: &str) {
        if let Ok(mut inner) = self.lock() {
            inner.entries.remove(key);
        }
    }

    /// Raw value, bypassing failure injection.
    pub fn peek(&self, key: &str) -> Option<Vec<u8>> {
        let mut inner = self.lock().ok()?;
        inner.purge_expired(Instant::now());
        inner.entries.get(key).map(|e| e.value.clone())
    }

    pub fn len(&self) -> usize {
        self.lock().map(|i| i.entries.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl StoreAdapter for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<StoreNode>, StoreError> {
        let inner = self.begin()?;
        let now = Instant::now();
        Ok(inner.entries.get(key).map(|e| Inner::node(key, e, now)))
    }

    async fn list_children(&self, prefix: &str) -> Result<Vec<StoreNode>, StoreError> {
        let inner = self.begin()?;
        let now = Instant::now();
        let dir = format!("{}/", normalize(prefix));

        let children: Vec<StoreNode> = inner
            .entries
            .range(dir.clone()..)
            .take_while(|(key, _)| key.starts_with(&dir))
            .filter(|(key, _)| !key[dir.len()..].contains('/'))
            .map(|(key, entry)| Inner::node(key, entry, now))
            .collect();

        if children.is_empty() {
            return Err(StoreError::KeyNotFound);
        }
        Ok(children)
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &[u8],
        new_value: Vec<u8>,
    ) -> Result<(), StoreError> {
        let mut inner = self.begin()?;
        let entry = inner.entries.get_mut(key).ok_or(StoreError::KeyNotFound)?;
        if entry.value != expected {
            trace!(key, "compare-and-swap mismatch");
            return Err(StoreError::CompareFailed);
        }
        entry.value = new_value;
        Ok(())
    }

    async fn set(&self, node: StoreNode) -> Result<(), StoreError> {
        let mut inner = self.begin()?;
        let expires_at = node.ttl.map(|ttl| Instant::now() + ttl);
        inner.entries.insert(
            node.key,
            Entry {
                value: node.value,
                expires_at,
            },
        );
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<(), StoreError> {
        let mut inner = self.begin()?;
        let mut missing = false;
        for key in keys {
            missing |= inner.entries.remove(key).is_none();
        }
        if missing {
            return Err(StoreError::KeyNotFound);
        }
        Ok(())
    }

    async fn maintain_lease(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> Result<(LeaseHandle, LeaseSubscription), StoreError> {
        if ttl.is_zero() {
            return Err(StoreError::Unavailable("lease ttl must be positive".into()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let stop = cancel.clone();
        let inner = Arc::clone(&self.inner);
        let key = key.to_string();
        let refresh = (ttl / 2).max(Duration::from_millis(1));

        let join = tokio::spawn(async move {
            let mut held = false;
            loop {
                let now_held = match inner.lock() {
                    Ok(mut guard) => guard.try_hold(&key, &value, ttl),
                    Err(_) => break,
                };
                if now_held != held {
                    held = now_held;
                    debug!(key = %key, held, "lease status changed");
                    // subscriber が居なくても lease は維持する
                    let _ = tx.send(held);
                }

                tokio::select! {
                    _ = stop.cancelled() => {
                        if let Ok(mut guard) = inner.lock() {
                            guard.release_if_held(&key, &value);
                        }
                        debug!(key = %key, "lease released");
                        break;
                    }
                    _ = tokio::time::sleep(refresh) => {}
                }
            }
        });

        Ok((LeaseHandle::new(cancel, join), LeaseSubscription::new(rx)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(nodes: &[StoreNode]) -> Vec<&str> {
        nodes.iter().map(|n| n.key.as_str()).collect()
    }

    #[tokio::test]
    async fn get_set_roundtrip() {
        let store = InMemoryStore::new();
        assert_eq!(store.get("/a").await.unwrap(), None);

        store.set(StoreNode::new("/a", b"1".to_vec())).await.unwrap();
        let node = store.get("/a").await.unwrap().unwrap();
        assert_eq!(node.value, b"1");
        assert_eq!(node.ttl, None);
    }

    #[tokio::test]
    async fn list_children_only_returns_direct_children() {
        let store = InMemoryStore::new();
        for key in ["/v2/run_once/a", "/v2/run_once/b", "/v2/run_once/b/x", "/v2/run_onceX/c"] {
            store.set(StoreNode::new(key, vec![])).await.unwrap();
        }

        let nodes = store.list_children("/v2/run_once").await.unwrap();
        assert_eq!(keys(&nodes), vec!["/v2/run_once/a", "/v2/run_once/b"]);

        let nodes = store.list_children("/v2/run_once/").await.unwrap();
        assert_eq!(nodes.len(), 2);
    }

    #[tokio::test]
    async fn list_children_of_empty_prefix_is_not_found() {
        let store = InMemoryStore::new();
        let err = store.list_children("/v2/executor").await.unwrap_err();
        assert_eq!(err, StoreError::KeyNotFound);
    }

    #[tokio::test]
    async fn compare_and_swap_semantics() {
        let store = InMemoryStore::new();
        assert_eq!(
            store.compare_and_swap("/k", b"a", b"b".to_vec()).await,
            Err(StoreError::KeyNotFound)
        );

        store.set(StoreNode::new("/k", b"a".to_vec())).await.unwrap();
        assert_eq!(
            store.compare_and_swap("/k", b"x", b"b".to_vec()).await,
            Err(StoreError::CompareFailed)
        );
        store.compare_and_swap("/k", b"a", b"b".to_vec()).await.unwrap();
        assert_eq!(store.peek("/k"), Some(b"b".to_vec()));
    }

    #[tokio::test]
    async fn delete_reports_missing_keys_after_deleting_present_ones() {
        let store = InMemoryStore::new();
        store.set(StoreNode::new("/a", vec![])).await.unwrap();

        let err = store
            .delete(&["/a".to_string(), "/missing".to_string()])
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::KeyNotFound);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn injected_failures_are_consumed_in_order() {
        let store = InMemoryStore::new();
        store.inject_failures([StoreError::Timeout, StoreError::Unavailable("x".into())]);

        assert_eq!(store.get("/a").await, Err(StoreError::Timeout));
        assert!(matches!(store.get("/a").await, Err(StoreError::Unavailable(_))));
        assert_eq!(store.get("/a").await, Ok(None));
    }

    #[tokio::test(start_paused = true)]
    async fn ttl_keys_expire() {
        let store = InMemoryStore::new();
        store
            .set(StoreNode::new("/t", vec![]).with_ttl(Duration::from_secs(5)))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(4)).await;
        let node = store.get("/t").await.unwrap().unwrap();
        assert_eq!(node.ttl, Some(Duration::from_secs(1)));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.get("/t").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn lease_is_kept_alive_and_released() {
        let store = InMemoryStore::new();
        let (handle, mut status) = store
            .maintain_lease("/v2/executor/e1", b"".to_vec(), Duration::from_secs(2))
            .await
            .unwrap();

        assert_eq!(status.next().await, Some(true));

        // Well past the TTL: the keep-alive loop refreshed it.
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(store.peek("/v2/executor/e1").is_some());

        handle.release().await;
        assert_eq!(status.next().await, None);
        assert!(store.peek("/v2/executor/e1").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn lease_on_a_taken_key_waits_for_it() {
        let store = InMemoryStore::new();
        let (first, mut first_status) = store
            .maintain_lease("/v2/locks/l", b"one".to_vec(), Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(first_status.next().await, Some(true));

        let (second, mut second_status) = store
            .maintain_lease("/v2/locks/l", b"two".to_vec(), Duration::from_secs(2))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(store.peek("/v2/locks/l"), Some(b"one".to_vec()));

        first.release().await;
        assert_eq!(second_status.next().await, Some(true));
        assert_eq!(store.peek("/v2/locks/l"), Some(b"two".to_vec()));

        second.release().await;
        first_status.drain().await;
        second_status.drain().await;
    }

    #[tokio::test(start_paused = true)]
    async fn lease_reports_loss_when_taken_over() {
        let store = InMemoryStore::new();
        let (handle, mut status) = store
            .maintain_lease("/v2/locks/l", b"me".to_vec(), Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(status.next().await, Some(true));

        // Someone else grabs the key between two refreshes.
        store.expire("/v2/locks/l");
        store
            .set(StoreNode::new("/v2/locks/l", b"other".to_vec()).with_ttl(Duration::from_secs(60)))
            .await
            .unwrap();

        assert_eq!(status.next().await, Some(false));
        handle.release().await;
        assert_eq!(store.peek("/v2/locks/l"), Some(b"other".to_vec()));
    }

    #[tokio::test]
    async fn zero_ttl_is_rejected() {
        let store = InMemoryStore::new();
        let res = store.maintain_lease("/k", vec![], Duration::ZERO).await;
        assert!(matches!(res, Err(StoreError::Unavailable(_))));
    }
}
