//! Matrix Sync SDK - Matrix 客户端同步引擎
//!
//! 本 SDK 把 Matrix `/sync` 长轮询的原始增量转换成应用层语义事件：
//! - 房间状态存储与不可变快照
//! - 截断时间线的间隙补齐（反向分页）
//! - 成员变更推断：加入、离开、被踢、封禁、邀请……
//! - 消息与回复解析（带最近事件缓存）
//! - 有并发上限的事件分发，繁忙时丢弃不重要事件
//!
//! HTTP 由嵌入方通过 [`MatrixTransport`] 提供。
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use matrix_sync_sdk::{ClientConfig, ClientEvent, ClientEventType, MatrixClient, MatrixTransport};
//!
//! async fn start(transport: Arc<dyn MatrixTransport>) -> matrix_sync_sdk::Result<()> {
//!     let client = MatrixClient::new(transport, ClientConfig::default())?;
//!
//!     client.subscribe_fn(ClientEventType::MemberJoined, |event| async move {
//!         if let ClientEvent::MemberJoined { room, member_id, .. } = event {
//!             println!("{} 加入了 {}", member_id, room.room_id());
//!         }
//!         Ok(())
//!     });
//!
//!     client.run().await
//! }
//! ```

pub mod config;
pub mod content;
pub mod error;
pub mod event_bus;
pub mod events;
pub mod identifier;
pub mod state;
pub mod sync;
pub mod transport;
pub mod types;
pub mod version;
pub mod client;

#[cfg(test)]
pub(crate) mod test_support;

// 重新导出核心类型，方便使用
pub use client::MatrixClient;
pub use config::{ClientConfig, ClientConfigBuilder, SyncRetryConfig};
pub use content::{ContentRegistry, EventContent, Membership, MessageContent};
pub use error::{Result, SdkError};
pub use event_bus::{DispatchStats, EventBus, EventHandler, SubscriptionId};
pub use events::{ClientEvent, ClientEventType};
pub use identifier::{Identifier, Sigil};
pub use state::{GlobalState, RoomSnapshot, RoomState};
pub use sync::{SyncCoordinator, SyncState, SyncStatus};
pub use transport::MatrixTransport;
pub use types::{EphemeralEvent, EventPage, JoinedRoomDelta, RoomEvent, SyncBatch};
pub use version::{BUILD_TIME, GIT_SHA, SDK_VERSION};
