/// 同步协调器
///
/// 职责：
/// - 把一次 `/sync` 结果应用到全局状态（唯一写入方）
/// - 新房间：注册、发出 RoomJoinedByMe，基线回放不产生差异事件
/// - 已知房间且时间线被截断：先补齐间隙，补回的事件排在本批次所有事件之前
/// - 按"补回事件 -> 状态事件 -> 时间线事件"顺序回放，按事件类型查分发表解析语义事件
/// - 初始同步的所有语义事件都丢弃，只建立基线
///
/// 解析在释放写锁之后进行（回复解析可能需要一次网络请求）。

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::content::{ROOM_MEMBER, ROOM_MESSAGE};
use crate::error::Result;
use crate::events::ClientEvent;
use crate::state::{GlobalState, Room, RoomSnapshot};
use crate::sync::gap_recovery::GapRecovery;
use crate::sync::membership::resolve_member_event;
use crate::transport::MatrixTransport;
use crate::types::{JoinedRoomDelta, RoomEvent, SyncBatch};

/// 事件类型对应的解析器
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResolverKind {
    Message,
    Membership,
}

fn resolver_table() -> HashMap<&'static str, ResolverKind> {
    let mut table = HashMap::new();
    table.insert(ROOM_MESSAGE, ResolverKind::Message);
    table.insert(ROOM_MEMBER, ResolverKind::Membership);
    table
}

/// 回放时记录、释放写锁后再解析的事件
struct PendingResolution {
    kind: ResolverKind,
    before: Option<RoomSnapshot>,
    after: Arc<RoomSnapshot>,
    event: Arc<RoomEvent>,
}

/// 同步协调器
pub struct SyncCoordinator {
    state: Arc<GlobalState>,
    transport: Arc<dyn MatrixTransport>,
    gap_recovery: GapRecovery,
    resolvers: HashMap<&'static str, ResolverKind>,
}

impl SyncCoordinator {
    pub fn new(state: Arc<GlobalState>, transport: Arc<dyn MatrixTransport>, backfill_page_size: usize) -> Self {
        Self {
            gap_recovery: GapRecovery::new(transport.clone(), backfill_page_size),
            state,
            transport,
            resolvers: resolver_table(),
        }
    }

    pub fn state(&self) -> &Arc<GlobalState> {
        &self.state
    }

    /// 处理一次同步结果，返回按房间顺序排列的语义事件
    ///
    /// `initial` 为 true 时只建立基线，返回空列表。
    pub async fn process(&self, batch: SyncBatch, initial: bool) -> Result<Vec<ClientEvent>> {
        debug!(
            "处理同步批次: next_batch={}, rooms={}, initial={}",
            batch.next_batch,
            batch.joined.len(),
            initial
        );

        let mut emitted = Vec::new();
        for delta in batch.joined {
            let room_events = self.process_room(delta, initial).await;
            emitted.extend(room_events);
        }

        // 所有房间处理完后再推进游标
        self.state.set_next_batch(batch.next_batch).await;

        if initial {
            info!("初始同步完成: rooms={}", self.state.room_count().await);
            return Ok(Vec::new());
        }
        Ok(emitted)
    }

    async fn process_room(&self, delta: JoinedRoomDelta, initial: bool) -> Vec<ClientEvent> {
        let room_id = delta.room_id.clone();
        let known = self.state.is_known_room(&room_id).await;
        let resolve = known && !initial;

        // 补回的事件早于本批次的状态段，回放顺序：补回 -> 状态 -> 时间线
        let recovered = if known && delta.limited && !initial {
            self.recover_gap(&delta).await
        } else {
            Vec::new()
        };

        let mut pending = Vec::new();
        let mut joined_snapshot = None;
        let mut ephemeral_snapshot = None;

        {
            let mut rooms = self.state.rooms_mut().await;
            let room = rooms.entry(room_id.clone()).or_insert_with(|| {
                info!("加入新房间: room_id={}", room_id);
                Room::new(room_id.clone())
            });

            for event in &recovered {
                if let Some(resolution) = self.replay_timeline(room, event, resolve) {
                    pending.push(resolution);
                }
            }
            for event in &delta.state {
                if let Some(resolution) = self.replay(room, event, resolve) {
                    pending.push(resolution);
                }
            }
            for event in &delta.timeline {
                if let Some(resolution) = self.replay_timeline(room, event, resolve) {
                    pending.push(resolution);
                }
            }

            if !known && !initial {
                joined_snapshot = Some(Arc::new(room.snapshot()));
            }
            if resolve && !delta.ephemeral.is_empty() {
                ephemeral_snapshot = Some(Arc::new(room.snapshot()));
            }
        }

        let mut emitted = Vec::new();
        if let Some(room) = joined_snapshot {
            emitted.push(ClientEvent::RoomJoinedByMe { room });
        }

        for resolution in pending {
            if let Some(event) = self.resolve(resolution).await {
                emitted.push(event);
            }
        }

        if let Some(room) = ephemeral_snapshot {
            for event in delta.ephemeral {
                emitted.push(ClientEvent::Ephemeral {
                    room: room.clone(),
                    event,
                });
            }
        }

        emitted
    }

    /// 补齐间隙；任何失败都降级为只用本批次事件
    async fn recover_gap(&self, delta: &JoinedRoomDelta) -> Vec<Arc<RoomEvent>> {
        let Some(prev_batch) = delta.prev_batch.as_deref() else {
            warn!("时间线被截断但没有 prev_batch，跳过补齐: room_id={}", delta.room_id);
            return Vec::new();
        };
        let Some(last_known) = self.state.last_known_event_id(&delta.room_id).await else {
            debug!("房间没有已知时间线位置，跳过补齐: room_id={}", delta.room_id);
            return Vec::new();
        };

        match self.gap_recovery.recover(&delta.room_id, prev_batch, &last_known).await {
            Ok(outcome) => outcome.into_events(),
            Err(e) => {
                warn!("时间线补齐失败，继续处理本批次: room_id={}, error={}", delta.room_id, e);
                Vec::new()
            }
        }
    }

    /// 回放单条事件；需要解析时记录前后快照
    fn replay(&self, room: &mut Room, event: &Arc<RoomEvent>, resolve: bool) -> Option<PendingResolution> {
        let kind = if resolve {
            self.resolvers.get(event.event_type.as_str()).copied()
        } else {
            None
        };

        let before = match kind {
            Some(ResolverKind::Membership) => Some(room.snapshot()),
            _ => None,
        };

        room.apply(event.clone());

        kind.map(|kind| PendingResolution {
            kind,
            before,
            after: Arc::new(room.snapshot()),
            event: event.clone(),
        })
    }

    /// 回放时间线事件，同时推进时间线位置并写入最近事件缓存
    fn replay_timeline(&self, room: &mut Room, event: &Arc<RoomEvent>, resolve: bool) -> Option<PendingResolution> {
        let resolution = self.replay(room, event, resolve);
        room.mark_timeline_position(&event.event_id);
        self.state.cache_event(event.clone());
        resolution
    }

    async fn resolve(&self, resolution: PendingResolution) -> Option<ClientEvent> {
        let PendingResolution { kind, before, after, event } = resolution;
        match kind {
            ResolverKind::Membership => {
                let before = before?;
                resolve_member_event(&before, &event).map(|t| t.into_client_event(after))
            }
            ResolverKind::Message => self.resolve_message(after, event).await,
        }
    }

    /// 消息 / 回复解析
    async fn resolve_message(&self, room: Arc<RoomSnapshot>, message: Arc<RoomEvent>) -> Option<ClientEvent> {
        let Some(content) = message.content.as_message() else {
            debug!("消息内容无法解析，跳过: event_id={}", message.event_id);
            return None;
        };

        let Some(target) = content.in_reply_to() else {
            return Some(ClientEvent::MessageReceived { room, message });
        };
        let in_reply_to = target.to_string();

        let replied_to = match self.state.find_cached_event(&in_reply_to) {
            Some(cached) => Some(cached),
            None => match self.transport.get_event(&message.room_id, &in_reply_to).await {
                Ok(fetched) => {
                    self.state.cache_event(fetched.clone());
                    Some(fetched)
                }
                Err(e) => {
                    warn!(
                        "获取被回复事件失败: room_id={}, event_id={}, error={}",
                        message.room_id, in_reply_to, e
                    );
                    None
                }
            },
        };

        Some(ClientEvent::MessageReply {
            room,
            message,
            in_reply_to,
            replied_to,
        })
    }
}
