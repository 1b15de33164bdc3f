/// 同步模块
///
/// 职责：
/// - 把 `/sync` 结果应用到房间状态并解析语义事件（coordinator）
/// - 截断时间线的间隙补齐（gap_recovery）
/// - 成员变更推断（membership）
/// - 同步循环失败时的退避（backoff）

pub mod backoff;
pub mod coordinator;
pub mod gap_recovery;
pub mod membership;

pub use backoff::SyncBackoff;
pub use coordinator::SyncCoordinator;
pub use gap_recovery::{GapRecovery, RecoveryOutcome, DEFAULT_BACKFILL_PAGE_SIZE};
pub use membership::{resolve_member_event, resolve_transition, MembershipTransition};

/// 同步状态
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SyncState {
    /// 尚未开始
    Idle,
    /// 正在同步
    Syncing,
    /// 已同步
    Synced,
    /// 同步失败，等待重试
    Failed {
        /// 错误消息
        error: String,
    },
    /// 已停止
    Stopped,
}

/// 同步循环状态快照
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SyncStatus {
    pub state: SyncState,
    pub next_batch: Option<String>,
    /// 连续失败次数
    pub consecutive_failures: u32,
    /// 最近一次成功同步的时间（毫秒时间戳）
    pub last_sync_at: Option<i64>,
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self {
            state: SyncState::Idle,
            next_batch: None,
            consecutive_failures: 0,
            last_sync_at: None,
        }
    }
}
