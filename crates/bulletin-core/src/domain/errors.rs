//! Errors - エラー型と分類

use thiserror::Error;

use super::ids::TaskGuid;
use crate::ports::store::StoreError;

/// ErrorKind は運用上の分類
///
/// - Transient: 一時的なエラー（store timeout、リトライ対象）
/// - Conflict: CAS 不一致（呼び出し側の前提が古い、リトライしない）
/// - Infrastructure: store の障害や壊れたレコード
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Conflict,
    Infrastructure,
}

/// Task (de)serialization failure.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to encode task: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to decode task: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Errors returned by the task transition operations.
#[derive(Debug, Error)]
pub enum BbsError {
    /// Another executor won the claim (or the task is gone).
    #[error("task {0} already claimed")]
    AlreadyClaimed(TaskGuid),

    /// The stored record no longer matches the caller's copy.
    #[error("stale write for task {0}: stored record changed")]
    StaleWrite(TaskGuid),

    #[error("store unavailable: {0}")]
    StoreUnavailable(#[source] StoreError),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl BbsError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BbsError::AlreadyClaimed(_) | BbsError::StaleWrite(_) => ErrorKind::Conflict,
            BbsError::StoreUnavailable(StoreError::Timeout) => ErrorKind::Transient,
            BbsError::StoreUnavailable(_) | BbsError::Codec(_) => ErrorKind::Infrastructure,
        }
    }

    /// Conflicts are semantic signals: the caller must bail, not retry.
    pub fn is_conflict(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }
}
