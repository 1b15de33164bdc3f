//! 传输层接口
//!
//! SDK 不自带 HTTP 实现。嵌入方实现 [`MatrixTransport`]，负责鉴权、HTTP
//! 重试和 JSON 请求；响应体可以交给本模块的 `decode_*` 函数转换成同步引擎
//! 使用的类型。

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::content::ContentRegistry;
use crate::error::{Result, SdkError};
use crate::identifier::Identifier;
use crate::types::{EphemeralEvent, EventPage, JoinedRoomDelta, RoomEvent, SyncBatch};

/// 客户端-服务器 API 的最小子集
#[async_trait]
pub trait MatrixTransport: Send + Sync {
    /// 当前登录用户
    async fn whoami(&self) -> Result<Identifier>;

    /// `/sync` 长轮询
    ///
    /// `since` 为 None 表示初始同步；`timeout_ms` 为 None 时服务器立即返回。
    async fn sync(&self, since: Option<&str>, timeout_ms: Option<u64>, filter: &str) -> Result<SyncBatch>;

    /// `/rooms/{room_id}/messages` 分页
    async fn get_events(
        &self,
        room_id: &Identifier,
        from_token: &str,
        reverse: bool,
        limit: usize,
    ) -> Result<EventPage>;

    /// 按 ID 获取单条事件
    async fn get_event(&self, room_id: &Identifier, event_id: &str) -> Result<Arc<RoomEvent>>;
}

// ============================================================
// 线格式解码
// ============================================================

#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    state_key: Option<String>,
    sender: String,
    #[serde(default)]
    content: Value,
    event_id: String,
    #[serde(default)]
    origin_server_ts: u64,
}

#[derive(Debug, Default, Deserialize)]
struct RawEventList {
    #[serde(default)]
    events: Vec<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct RawTimeline {
    #[serde(default)]
    events: Vec<Value>,
    #[serde(default)]
    limited: bool,
    #[serde(default)]
    prev_batch: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawJoinedRoom {
    #[serde(default)]
    state: RawEventList,
    #[serde(default)]
    timeline: RawTimeline,
    #[serde(default)]
    ephemeral: RawEventList,
}

#[derive(Debug, Default, Deserialize)]
struct RawRooms {
    /// 保持服务器返回的房间顺序（serde_json preserve_order）
    #[serde(default)]
    join: serde_json::Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct RawSyncResponse {
    next_batch: String,
    #[serde(default)]
    rooms: RawRooms,
}

#[derive(Debug, Deserialize)]
struct RawMessagesResponse {
    #[serde(default)]
    chunk: Vec<Value>,
    #[serde(default)]
    end: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawEphemeral {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    content: Value,
}

/// 解码单条房间事件
pub fn decode_event(room_id: &Identifier, raw: &Value, registry: &ContentRegistry) -> Result<Arc<RoomEvent>> {
    let raw: RawEvent = serde_json::from_value(raw.clone())?;
    let sender = Identifier::parse(&raw.sender)?;
    let content = registry.parse(&raw.event_type, raw.content);

    Ok(Arc::new(RoomEvent {
        event_type: raw.event_type,
        state_key: raw.state_key,
        sender,
        content,
        event_id: raw.event_id,
        origin_server_ts: raw.origin_server_ts,
        room_id: room_id.clone(),
    }))
}

/// 解码事件列表，格式错误的单条事件跳过
fn decode_events(room_id: &Identifier, raws: &[Value], registry: &ContentRegistry) -> Vec<Arc<RoomEvent>> {
    raws.iter()
        .filter_map(|raw| match decode_event(room_id, raw, registry) {
            Ok(event) => Some(event),
            Err(e) => {
                warn!("跳过格式错误的事件: room_id={}, error={}", room_id, e);
                None
            }
        })
        .collect()
}

/// 解码 `/sync` 响应体
pub fn decode_sync_response(raw: &Value, registry: &ContentRegistry) -> Result<SyncBatch> {
    let response: RawSyncResponse = serde_json::from_value(raw.clone())?;

    let mut joined = Vec::with_capacity(response.rooms.join.len());
    for (room_key, raw_room) in response.rooms.join {
        let room_id = match Identifier::parse(&room_key) {
            Ok(id) => id,
            Err(e) => {
                warn!("跳过非法房间 ID: room_id={}, error={}", room_key, e);
                continue;
            }
        };
        let room: RawJoinedRoom = match serde_json::from_value(raw_room) {
            Ok(room) => room,
            Err(e) => {
                warn!("跳过格式错误的房间增量: room_id={}, error={}", room_id, e);
                continue;
            }
        };

        let mut delta = JoinedRoomDelta::new(room_id.clone());
        delta.state = decode_events(&room_id, &room.state.events, registry);
        delta.timeline = decode_events(&room_id, &room.timeline.events, registry);
        delta.limited = room.timeline.limited;
        delta.prev_batch = room.timeline.prev_batch;
        delta.ephemeral = room
            .ephemeral
            .events
            .into_iter()
            .filter_map(|raw| serde_json::from_value::<RawEphemeral>(raw).ok())
            .map(|e| EphemeralEvent {
                event_type: e.event_type,
                content: e.content,
            })
            .collect();
        joined.push(delta);
    }

    Ok(SyncBatch {
        next_batch: response.next_batch,
        joined,
    })
}

/// 解码 `/messages` 响应体
pub fn decode_event_page(room_id: &Identifier, raw: &Value, registry: &ContentRegistry) -> Result<EventPage> {
    let response: RawMessagesResponse = serde_json::from_value(raw.clone())?;
    Ok(EventPage {
        chunk: decode_events(room_id, &response.chunk, registry),
        end: response.end,
    })
}

/// 解码 `/account/whoami` 响应体
pub fn decode_whoami(raw: &Value) -> Result<Identifier> {
    let user_id = raw
        .get("user_id")
        .and_then(Value::as_str)
        .ok_or_else(|| SdkError::InvalidData("whoami response has no user_id".to_string()))?;
    Identifier::parse(user_id)
}
