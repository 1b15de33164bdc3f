//! 同步数据结构
//!
//! 这些类型是传输层（[`crate::transport::MatrixTransport`]）交给同步引擎的
//! 已解析结果，JSON 线格式的解析在传输层完成。

use std::sync::Arc;

use serde_json::Value;

use crate::content::{EventContent, Membership};
use crate::identifier::Identifier;

/// 一条房间事件
///
/// 带 `state_key` 的是状态事件；消息等时间线事件没有 `state_key`。
#[derive(Debug, Clone)]
pub struct RoomEvent {
    pub event_type: String,
    pub state_key: Option<String>,
    pub sender: Identifier,
    pub content: EventContent,
    pub event_id: String,
    /// 源服务器时间戳（毫秒）
    pub origin_server_ts: u64,
    pub room_id: Identifier,
}

impl RoomEvent {
    pub fn is_state(&self) -> bool {
        self.state_key.is_some()
    }

    /// 成员事件的 membership（非成员事件返回 None）
    pub fn membership(&self) -> Option<Membership> {
        self.content.as_member().map(|c| c.membership)
    }
}

/// 单个已加入房间的增量
#[derive(Debug, Clone)]
pub struct JoinedRoomDelta {
    pub room_id: Identifier,
    /// 时间线开始之前的状态
    pub state: Vec<Arc<RoomEvent>>,
    /// 时间线事件，按服务器投递顺序
    pub timeline: Vec<Arc<RoomEvent>>,
    /// 服务器是否截断了时间线
    pub limited: bool,
    /// 向前翻页的令牌
    pub prev_batch: Option<String>,
    /// 临时事件（typing、回执等）
    pub ephemeral: Vec<EphemeralEvent>,
}

impl JoinedRoomDelta {
    pub fn new(room_id: Identifier) -> Self {
        Self {
            room_id,
            state: Vec::new(),
            timeline: Vec::new(),
            limited: false,
            prev_batch: None,
            ephemeral: Vec::new(),
        }
    }
}

/// 临时事件，不进入房间状态
#[derive(Debug, Clone)]
pub struct EphemeralEvent {
    pub event_type: String,
    pub content: Value,
}

/// 一次 `/sync` 的结果
#[derive(Debug, Clone, Default)]
pub struct SyncBatch {
    /// 下一次同步使用的游标
    pub next_batch: String,
    /// 已加入房间，保持服务器返回的顺序
    pub joined: Vec<JoinedRoomDelta>,
}

/// `/messages` 的分页结果
#[derive(Debug, Clone, Default)]
pub struct EventPage {
    /// 反向分页时按从新到旧排列
    pub chunk: Vec<Arc<RoomEvent>>,
    /// 下一页令牌；None 表示已到时间线尽头
    pub end: Option<String>,
}
