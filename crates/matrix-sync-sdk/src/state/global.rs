/// 全局同步状态
///
/// 职责：
/// - 房间注册表（Identifier -> Room）
/// - 同步游标（next_batch）
/// - 最近事件环形缓存，用于回复解析时免去网络请求
///
/// 房间状态只由同步循环写入；其它调用方拿到的都是不可变快照。

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{RwLock, RwLockWriteGuard};
use tracing::debug;

use crate::content::{EventContent, ROOM_NAME};
use crate::identifier::Identifier;
use crate::state::room_state::{RoomSnapshot, RoomState};
use crate::types::RoomEvent;

/// 默认最近事件缓存容量
pub const DEFAULT_RECENT_EVENT_CAPACITY: usize = 1000;

/// 一个已加入的房间
#[derive(Debug)]
pub struct Room {
    id: Identifier,
    state: RoomState,
    /// 最后一条已知时间线事件，用于间隙补齐时定位
    last_known_event_id: Option<String>,
}

impl Room {
    pub fn new(id: Identifier) -> Self {
        Self {
            id,
            state: RoomState::new(),
            last_known_event_id: None,
        }
    }

    pub fn id(&self) -> &Identifier {
        &self.id
    }

    pub fn state(&self) -> &RoomState {
        &self.state
    }

    pub fn last_known_event_id(&self) -> Option<&str> {
        self.last_known_event_id.as_deref()
    }

    /// 应用状态事件
    pub fn apply(&mut self, event: Arc<RoomEvent>) -> bool {
        self.state.apply(event)
    }

    /// 记录时间线位置
    pub fn mark_timeline_position(&mut self, event_id: &str) {
        self.last_known_event_id = Some(event_id.to_string());
    }

    pub fn snapshot(&self) -> RoomSnapshot {
        self.state.snapshot(&self.id, self.last_known_event_id.as_deref())
    }
}

/// 固定容量的最近事件缓存，满了淘汰最旧的
#[derive(Debug)]
pub struct RecentEventCache {
    events: VecDeque<Arc<RoomEvent>>,
    capacity: usize,
}

impl RecentEventCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, event: Arc<RoomEvent>) {
        if self.capacity == 0 {
            return;
        }
        if self.events.len() >= self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    /// 按事件 ID 查找，从最新的开始
    pub fn find(&self, event_id: &str) -> Option<Arc<RoomEvent>> {
        self.events
            .iter()
            .rev()
            .find(|event| event.event_id == event_id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// 客户端会话级别的全局状态
pub struct GlobalState {
    rooms: RwLock<HashMap<Identifier, Room>>,
    next_batch: RwLock<Option<String>>,
    recent_events: Mutex<RecentEventCache>,
}

impl GlobalState {
    pub fn new(recent_event_capacity: usize) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            next_batch: RwLock::new(None),
            recent_events: Mutex::new(RecentEventCache::new(recent_event_capacity)),
        }
    }

    /// 房间当前快照
    pub async fn get_room(&self, room_id: &Identifier) -> Option<Arc<RoomSnapshot>> {
        let rooms = self.rooms.read().await;
        rooms.get(room_id).map(|room| Arc::new(room.snapshot()))
    }

    /// 按 m.room.name 精确查找房间
    pub async fn find_room_by_name(&self, name: &str) -> Option<Arc<RoomSnapshot>> {
        let rooms = self.rooms.read().await;
        // 先在锁内比对名称事件，只为命中的房间生成快照
        rooms
            .values()
            .find(|room| match room.state().get(ROOM_NAME, "").map(|e| &e.content) {
                Some(EventContent::Name(c)) => c.name == name,
                _ => false,
            })
            .map(|room| Arc::new(room.snapshot()))
    }

    pub async fn room_ids(&self) -> Vec<Identifier> {
        self.rooms.read().await.keys().cloned().collect()
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    pub async fn is_known_room(&self, room_id: &Identifier) -> bool {
        self.rooms.read().await.contains_key(room_id)
    }

    /// 房间最后一条已知时间线事件；房间未知时返回 None
    pub async fn last_known_event_id(&self, room_id: &Identifier) -> Option<String> {
        let rooms = self.rooms.read().await;
        rooms
            .get(room_id)
            .and_then(|room| room.last_known_event_id().map(str::to_string))
    }

    /// 同步循环专用的写入口
    pub(crate) async fn rooms_mut(&self) -> RwLockWriteGuard<'_, HashMap<Identifier, Room>> {
        self.rooms.write().await
    }

    pub async fn next_batch(&self) -> Option<String> {
        self.next_batch.read().await.clone()
    }

    pub async fn set_next_batch(&self, token: String) {
        debug!("更新同步游标: next_batch={}", token);
        *self.next_batch.write().await = Some(token);
    }

    pub fn cache_event(&self, event: Arc<RoomEvent>) {
        self.recent_events.lock().push(event);
    }

    pub fn find_cached_event(&self, event_id: &str) -> Option<Arc<RoomEvent>> {
        self.recent_events.lock().find(event_id)
    }

    pub fn cached_event_count(&self) -> usize {
        self.recent_events.lock().len()
    }
}

impl Default for GlobalState {
    fn default() -> Self {
        Self::new(DEFAULT_RECENT_EVENT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::Membership;
    use crate::test_support::{member_event, message_event, name_event, room_id, user_id};

    #[test]
    fn test_recent_cache_evicts_oldest() {
        let room = room_id("r");
        let alice = user_id("a");
        let mut cache = RecentEventCache::new(3);

        for i in 0..5 {
            cache.push(message_event(&room, &format!("${}", i), &alice, "hi"));
        }

        assert_eq!(cache.len(), 3);
        assert!(cache.find("$0").is_none());
        assert!(cache.find("$1").is_none());
        assert!(cache.find("$4").is_some());
    }

    #[tokio::test]
    async fn test_get_and_find_room() {
        let state = GlobalState::default();
        let room = room_id("r");
        let alice = user_id("a");

        {
            let mut rooms = state.rooms_mut().await;
            let entry = rooms.entry(room.clone()).or_insert_with(|| Room::new(room.clone()));
            entry.apply(member_event(&room, "$1", &alice, &alice, Membership::Join));
            entry.apply(name_event(&room, "$2", &alice, "Lobby"));
            entry.mark_timeline_position("$2");
        }

        let snapshot = state.get_room(&room).await.unwrap();
        assert!(snapshot.member(&alice).is_some());
        assert_eq!(snapshot.last_known_event_id(), Some("$2"));

        let by_name = state.find_room_by_name("Lobby").await.unwrap();
        assert_eq!(by_name.room_id(), &room);
        assert!(state.find_room_by_name("Nope").await.is_none());

        assert!(state.is_known_room(&room).await);
        assert_eq!(state.last_known_event_id(&room).await.as_deref(), Some("$2"));
        assert!(state.get_room(&room_id("other")).await.is_none());
    }

    #[tokio::test]
    async fn test_find_room_by_name_among_many_rooms() {
        let state = GlobalState::default();
        let alice = user_id("a");

        {
            let mut rooms = state.rooms_mut().await;
            for (local, name) in [("r0", None), ("r1", Some("General")), ("r2", Some("Lobby")), ("r3", Some("Lobby 2"))] {
                let id = room_id(local);
                let room = rooms.entry(id.clone()).or_insert_with(|| Room::new(id.clone()));
                room.apply(member_event(&id, &format!("$j{}", local), &alice, &alice, Membership::Join));
                if let Some(name) = name {
                    room.apply(name_event(&id, &format!("$n{}", local), &alice, name));
                }
            }
        }

        let found = state.find_room_by_name("Lobby").await.unwrap();
        assert_eq!(found.room_id(), &room_id("r2"));
        assert_eq!(found.name(), Some("Lobby"));
        assert!(found.member(&alice).is_some());

        assert_eq!(state.find_room_by_name("General").await.unwrap().room_id(), &room_id("r1"));
        assert!(state.find_room_by_name("lobby").await.is_none());
        assert!(state.find_room_by_name("").await.is_none());
    }

    #[tokio::test]
    async fn test_next_batch_cursor() {
        let state = GlobalState::default();
        assert_eq!(state.next_batch().await, None);
        state.set_next_batch("s72594_4483_1934".to_string()).await;
        assert_eq!(state.next_batch().await.as_deref(), Some("s72594_4483_1934"));
    }
}
