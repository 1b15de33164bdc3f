/// 房间状态存储
///
/// 职责：
/// - 保存每个 (event_type, state_key) 的最新状态事件
/// - 成员离开（leave）时直接删除条目
/// - 生成只读快照供差异计算和订阅者使用

use std::collections::HashMap;
use std::sync::Arc;

use crate::content::{EventContent, Membership, ROOM_CANONICAL_ALIAS, ROOM_CREATE, ROOM_MEMBER, ROOM_NAME, ROOM_TOPIC};
use crate::error::{Result, SdkError};
use crate::identifier::Identifier;
use crate::types::RoomEvent;

/// event_type -> state_key -> 最新事件
type StateMap = HashMap<String, HashMap<String, Arc<RoomEvent>>>;

/// 可变的房间状态，只允许同步循环单线程写入
#[derive(Debug, Default)]
pub struct RoomState {
    events: StateMap,
}

impl RoomState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, event_type: &str, state_key: &str) -> Option<&Arc<RoomEvent>> {
        self.events.get(event_type)?.get(state_key)
    }

    /// 某类型下的全部当前状态事件
    pub fn get_all<'a>(&'a self, event_type: &str) -> impl Iterator<Item = &'a Arc<RoomEvent>> + 'a {
        self.events.get(event_type).into_iter().flat_map(|m| m.values())
    }

    /// 应用一条事件（唯一的修改入口）
    ///
    /// 非状态事件直接忽略并返回 false。
    pub fn apply(&mut self, event: Arc<RoomEvent>) -> bool {
        let Some(state_key) = event.state_key.clone() else {
            return false;
        };

        let per_type = self.events.entry(event.event_type.clone()).or_default();

        // 离开的成员直接删除；invite/join/ban/knock 保留
        if event.event_type == ROOM_MEMBER && event.membership() == Some(Membership::Leave) {
            per_type.remove(&state_key);
            return true;
        }

        per_type.insert(state_key, event);
        true
    }

    /// 状态事件总数
    pub fn len(&self) -> usize {
        self.events.values().map(|m| m.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 生成快照：新的外层映射 + 复制的内层映射，叶子事件共享
    pub fn snapshot(&self, room_id: &Identifier, last_known_event_id: Option<&str>) -> RoomSnapshot {
        let state = self
            .events
            .iter()
            .map(|(event_type, per_type)| (event_type.clone(), per_type.clone()))
            .collect();

        RoomSnapshot {
            room_id: room_id.clone(),
            state,
            last_known_event_id: last_known_event_id.map(str::to_string),
        }
    }
}

/// 房间在某一时刻的不可变视图
#[derive(Debug, Clone)]
pub struct RoomSnapshot {
    room_id: Identifier,
    state: StateMap,
    last_known_event_id: Option<String>,
}

impl RoomSnapshot {
    pub fn room_id(&self) -> &Identifier {
        &self.room_id
    }

    /// 快照时刻最后一条已知时间线事件 ID
    pub fn last_known_event_id(&self) -> Option<&str> {
        self.last_known_event_id.as_deref()
    }

    pub fn get(&self, event_type: &str, state_key: &str) -> Option<&Arc<RoomEvent>> {
        self.state.get(event_type)?.get(state_key)
    }

    pub fn get_all<'a>(&'a self, event_type: &str) -> impl Iterator<Item = &'a Arc<RoomEvent>> + 'a {
        self.state.get(event_type).into_iter().flat_map(|m| m.values())
    }

    /// 成员当前的 membership；已离开或从未出现返回 None
    pub fn membership_of(&self, user_id: &Identifier) -> Option<Membership> {
        self.get(ROOM_MEMBER, user_id.as_str())?.membership()
    }

    /// 已加入（join）的成员事件；invite/ban 等不算成员
    pub fn member(&self, user_id: &Identifier) -> Option<&Arc<RoomEvent>> {
        self.get(ROOM_MEMBER, user_id.as_str())
            .filter(|event| event.membership() == Some(Membership::Join))
    }

    /// 全部已加入成员
    pub fn members(&self) -> impl Iterator<Item = &Arc<RoomEvent>> + '_ {
        self.get_all(ROOM_MEMBER)
            .filter(|event| event.membership() == Some(Membership::Join))
    }

    pub fn joined_member_count(&self) -> usize {
        self.members().count()
    }

    /// 成员显示名；显示名重复时附带用户 ID 以消除歧义
    pub fn display_name(&self, user_id: &Identifier) -> Option<String> {
        let event = self.member(user_id)?;
        let Some(name) = event.content.as_member().and_then(|c| c.displayname.clone()) else {
            return Some(user_id.to_string());
        };

        let same_name = self
            .members()
            .filter(|other| {
                other.content.as_member().and_then(|c| c.displayname.as_deref()) == Some(name.as_str())
            })
            .count();

        if same_name > 1 {
            Some(format!("{} ({})", name, user_id))
        } else {
            Some(name)
        }
    }

    pub fn name(&self) -> Option<&str> {
        match &self.get(ROOM_NAME, "")?.content {
            EventContent::Name(c) => Some(c.name.as_str()),
            _ => None,
        }
    }

    pub fn topic(&self) -> Option<&str> {
        match &self.get(ROOM_TOPIC, "")?.content {
            EventContent::Topic(c) => Some(c.topic.as_str()),
            _ => None,
        }
    }

    pub fn canonical_alias(&self) -> Option<&str> {
        match &self.get(ROOM_CANONICAL_ALIAS, "")?.content {
            EventContent::CanonicalAlias(c) => c.alias.as_deref(),
            _ => None,
        }
    }

    fn create_event(&self) -> Result<&Arc<RoomEvent>> {
        self.get(ROOM_CREATE, "").ok_or_else(|| {
            SdkError::InvariantViolation(format!("room {} is missing m.room.create state", self.room_id))
        })
    }

    /// 房间创建者
    ///
    /// 已注册的房间必然带有 m.room.create，缺失时返回 `InvariantViolation`。
    pub fn creator_id(&self) -> Result<Identifier> {
        let event = self.create_event()?;
        match event.content.as_create() {
            Some(content) => Ok(content.creator.clone().unwrap_or_else(|| event.sender.clone())),
            None => Ok(event.sender.clone()),
        }
    }

    /// 房间是否允许其它服务器的用户加入
    pub fn is_federated(&self) -> Result<bool> {
        let event = self.create_event()?;
        Ok(event.content.as_create().map(|c| c.federate).unwrap_or(true))
    }
}
