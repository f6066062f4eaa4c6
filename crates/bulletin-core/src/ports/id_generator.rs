//! IdGenerator port - ID 生成の抽象化
//!
//! # 実装
//! - **UlidGenerator**: ULID ベース（本番用）

use crate::domain::ids::{ExecutorId, TaskGuid};
use crate::ports::Clock;
use ulid::Ulid;

/// IdGenerator は分散システムで使える ID を生成
///
/// # ULID の特性
/// - 時刻でソート可能
/// - 分散環境で生成可能（調整不要）
pub trait IdGenerator: Send + Sync {
    fn generate_task_guid(&self) -> TaskGuid;

    fn generate_executor_id(&self) -> ExecutorId;
}

/// UlidGenerator は ULID ベースの ID 生成器
///
/// Clock を使って現在時刻ベースの ULID を生成します。
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    fn next(&self) -> String {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        Ulid::from_parts(timestamp_ms, rand::random()).to_string()
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_task_guid(&self) -> TaskGuid {
        TaskGuid::new(self.next())
    }

    fn generate_executor_id(&self) -> ExecutorId {
        ExecutorId::new(self.next())
    }
}
