//! StoreAdapter port - 共有 KV store（正本 / source of truth）
//!
//! The replicated key-value store (etcd and friends) is the only thing the
//! processes of a fleet share. This port is the capability surface the BBS
//! needs from it; everything above depends on it, nothing here depends on
//! the BBS.
//!
//! # 実装
//! - `impls::InMemoryStore`（テスト・シミュレーション用）
//! - 本番用の実装は別クレートで提供する想定

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A key/value pair as returned by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreNode {
    pub key: String,
    pub value: Vec<u8>,
    /// Remaining lease time, `None` for keys without a TTL.
    pub ttl: Option<Duration>,
}

impl StoreNode {
    pub fn new(key: impl Into<String>, value: Vec<u8>) -> Self {
        Self {
            key: key.into(),
            value,
            ttl: None,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Last path segment of the key (`/v2/executor/abc` -> `abc`).
    pub fn name(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or(&self.key)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("key not found")]
    KeyNotFound,

    /// CAS precondition failed: the stored value is not the expected one.
    #[error("compare failed")]
    CompareFailed,

    /// Transient: the request may or may not have been applied.
    #[error("store request timed out")]
    Timeout,

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// StoreAdapter は BBS が必要とする store の操作
///
/// # 設計原則
/// - すべての操作は network call として扱う（ローカルロックを跨がない）
/// - `compare_and_swap` が唯一の調停者（linearizable single-key update）
/// - `list_children` は子が無ければ `KeyNotFound`（呼び出し側で空扱い）
#[async_trait]
pub trait StoreAdapter: Send + Sync {
    /// `Ok(None)` when the key does not exist.
    async fn get(&self, key: &str) -> Result<Option<StoreNode>, StoreError>;

    /// Direct children of `prefix`. Fails with `KeyNotFound` when there are none.
    async fn list_children(&self, prefix: &str) -> Result<Vec<StoreNode>, StoreError>;

    /// Replace `key`'s value with `new_value` only if it currently equals `expected`.
    ///
    /// A missing key fails with `KeyNotFound`, a different value with `CompareFailed`.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &[u8],
        new_value: Vec<u8>,
    ) -> Result<(), StoreError>;

    /// Create or overwrite; `node.ttl` attaches a lease.
    async fn set(&self, node: StoreNode) -> Result<(), StoreError>;

    /// Delete every key; absent keys are reported with `KeyNotFound` after
    /// the present ones have been removed.
    async fn delete(&self, keys: &[String]) -> Result<(), StoreError>;

    /// Keep `key = value` alive under a `ttl` lease until released.
    ///
    /// The key is only taken when absent (or already holding `value`), so the
    /// same primitive serves presence markers and locks. Status changes are
    /// delivered on the returned subscription.
    async fn maintain_lease(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> Result<(LeaseHandle, LeaseSubscription), StoreError>;
}

/// Handle to a running lease maintenance loop.
///
/// Dropping the handle does not stop the loop; call [`LeaseHandle::release`].
#[derive(Debug)]
pub struct LeaseHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl LeaseHandle {
    /// `join` must finish once `cancel` fires, after removing the key if held.
    pub fn new(cancel: CancellationToken, join: JoinHandle<()>) -> Self {
        Self { cancel, join }
    }

    /// Voluntarily give the lease up: the key is removed and the loop ends,
    /// which in turn closes the subscription.
    pub async fn release(self) {
        self.cancel.cancel();
        if let Err(e) = self.join.await {
            tracing::warn!(error = %e, "lease maintenance task did not exit cleanly");
        }
    }

    pub fn is_released(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Status stream of a lease.
///
/// # Contract
/// - yields `Some(true)` when the lease becomes held, `Some(false)` when it is lost
///   (only on changes)
/// - yields `None` exactly once maintenance has definitively ended
///   (released, or the store gave up); every later call also returns `None`
#[derive(Debug)]
pub struct LeaseSubscription {
    rx: mpsc::UnboundedReceiver<bool>,
}

impl LeaseSubscription {
    pub fn new(rx: mpsc::UnboundedReceiver<bool>) -> Self {
        Self { rx }
    }

    /// Wait for the next status change.
    pub async fn next(&mut self) -> Option<bool> {
        self.rx.recv().await
    }

    /// Consume events until the loop has ended.
    pub async fn drain(mut self) {
        while self.rx.recv().await.is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_name_is_last_segment() {
        assert_eq!(StoreNode::new("/v2/executor/abc", vec![]).name(), "abc");
        assert_eq!(StoreNode::new("plain", vec![]).name(), "plain");
    }

    #[tokio::test]
    async fn subscription_ends_when_sender_drops() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut sub = LeaseSubscription::new(rx);
        tx.send(true).unwrap();
        drop(tx);
        assert_eq!(sub.next().await, Some(true));
        assert_eq!(sub.next().await, None);
        assert_eq!(sub.next().await, None);
    }

    #[tokio::test]
    async fn release_cancels_and_joins() {
        let cancel = CancellationToken::new();
        let child = cancel.clone();
        let join = tokio::spawn(async move { child.cancelled().await });
        let handle = LeaseHandle::new(cancel, join);
        assert!(!handle.is_released());
        handle.release().await;
    }
}
