//! Domain identifiers (strongly-typed IDs).
//!
//! Task GUIDs and executor IDs are both opaque strings on the wire: producers
//! choose GUIDs, executors choose their own IDs, and both end up as path
//! segments in the store. `Id<T>` keeps them apart at compile time while
//! serializing exactly like a plain string.
//!
//! ## Phantom Type パターン
//! `T` は実行時には使わない（PhantomData）マーカー型。
//! `TaskGuid` と `ExecutorId` は異なる型なので混同できない。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;

/// IdMarker は各 ID 型のマーカー trait
pub trait IdMarker: Send + Sync + 'static {}

/// Generic string-backed ID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id<T: IdMarker> {
    value: String,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            _marker: PhantomData,
        }
    }

    /// The unset ID (e.g. `executor_id` of a task nobody has claimed yet).
    pub fn empty() -> Self {
        Self::new(String::new())
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }
}

impl<T: IdMarker> Default for Id<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T: IdMarker> From<&str> for Id<T> {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl<T: IdMarker> From<String> for Id<T> {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

// ========================================
// マーカー型の定義
// ========================================

/// Task のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TaskMarker {}

impl IdMarker for TaskMarker {}

/// Executor のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ExecutorMarker {}

impl IdMarker for ExecutorMarker {}

pub type TaskGuid = Id<TaskMarker>;
pub type ExecutorId = Id<ExecutorMarker>;
