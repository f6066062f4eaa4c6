//! App - アプリケーション層
//!
//! このモジュールは、Bbs と ports を組み合わせてプロセスの振る舞いを実装します。
//!
//! # 主要コンポーネント
//! - **BbsBuilder**: Bbs の構築とワイヤリング
//! - **Lifecycle**: バックグラウンド処理の停止と待ち合わせ
//! - **ExecutorAgent**: claim → start → complete、presence の維持
//! - **StagerAgent**: desire、完了通知の受け取り → resolve
//! - **ConvergeLoop**: converge lock を保持している間だけ収束パスを回す
//! - **TaskCounts**: 状態ごとの件数

pub mod builder;
pub mod converger;
pub mod executor;
pub mod lifecycle;
pub mod stager;
pub mod status;

use thiserror::Error;

use crate::domain::{BbsError, ExecutorId};

// 主要な型を再エクスポート
pub use self::builder::{BbsBuilder, BuildError};
pub use self::converger::ConvergeLoop;
pub use self::executor::{ClaimOutcome, ExecutorAgent};
pub use self::lifecycle::Lifecycle;
pub use self::stager::StagerAgent;
pub use self::status::TaskCounts;

/// Errors of the executor and stager agents.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("not enough memory: {requested} MB requested, {available} MB available")]
    NoCapacity { requested: u64, available: u64 },

    #[error("presence of executor {0} could not be held")]
    PresenceLost(ExecutorId),

    #[error("failed to publish result: {0}")]
    Publish(String),

    #[error(transparent)]
    Bbs(#[from] BbsError),
}
