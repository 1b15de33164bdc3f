//! 事件内容模型
//!
//! 已知事件类型是一个封闭的和类型 [`EventContent`]；未建模的类型保留原始 JSON
//! （[`EventContent::Unknown`]）。应用可以通过 [`ContentRegistry::register`]
//! 注册自定义事件类型的转换器。

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::Result;
use crate::identifier::Identifier;

pub const ROOM_CREATE: &str = "m.room.create";
pub const ROOM_MEMBER: &str = "m.room.member";
pub const ROOM_MESSAGE: &str = "m.room.message";
pub const ROOM_NAME: &str = "m.room.name";
pub const ROOM_TOPIC: &str = "m.room.topic";
pub const ROOM_JOIN_RULES: &str = "m.room.join_rules";
pub const ROOM_CANONICAL_ALIAS: &str = "m.room.canonical_alias";

/// `m.room.member` 中的 membership 取值
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Membership {
    Invite,
    Join,
    Knock,
    Leave,
    Ban,
}

impl Membership {
    pub fn as_str(self) -> &'static str {
        match self {
            Membership::Invite => "invite",
            Membership::Join => "join",
            Membership::Knock => "knock",
            Membership::Leave => "leave",
            Membership::Ban => "ban",
        }
    }
}

impl fmt::Display for Membership {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 前任房间引用（房间升级）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviousRoom {
    pub event_id: String,
    pub room_id: Identifier,
}

fn default_true() -> bool {
    true
}

fn default_room_version() -> String {
    "1".to_string()
}

/// `m.room.create`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateContent {
    /// 新版本房间不再携带 creator，此时以事件 sender 为准
    #[serde(default)]
    pub creator: Option<Identifier>,
    #[serde(rename = "m.federate", default = "default_true")]
    pub federate: bool,
    #[serde(default = "default_room_version")]
    pub room_version: String,
    #[serde(default)]
    pub predecessor: Option<PreviousRoom>,
}

/// `m.room.member`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberContent {
    pub membership: Membership,
    #[serde(default)]
    pub displayname: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub is_direct: bool,
}

impl MemberContent {
    pub fn new(membership: Membership) -> Self {
        Self {
            membership,
            displayname: None,
            avatar_url: None,
            reason: None,
            is_direct: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InReplyTo {
    pub event_id: String,
}

/// `m.relates_to`，同时兼容 nheko 的非稳定键
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelatesTo {
    #[serde(rename = "m.in_reply_to", default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<InReplyTo>,
    #[serde(
        rename = "im.nheko.relations.v1.in_reply_to",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub nheko_in_reply_to: Option<InReplyTo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rel_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
}

/// `m.room.message`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageContent {
    pub msgtype: String,
    pub body: String,
    #[serde(rename = "m.relates_to", default, skip_serializing_if = "Option::is_none")]
    pub relates_to: Option<RelatesTo>,
    /// 其余字段（format、formatted_body 等）原样保留
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl MessageContent {
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            msgtype: "m.text".to_string(),
            body: body.into(),
            relates_to: None,
            extra: serde_json::Map::new(),
        }
    }

    /// 回复的目标事件 ID（如果这是一条回复）
    pub fn in_reply_to(&self) -> Option<&str> {
        let relates_to = self.relates_to.as_ref()?;
        relates_to
            .in_reply_to
            .as_ref()
            .or(relates_to.nheko_in_reply_to.as_ref())
            .map(|r| r.event_id.as_str())
    }

    pub fn with_reply_to(mut self, event_id: impl Into<String>) -> Self {
        self.relates_to = Some(RelatesTo {
            in_reply_to: Some(InReplyTo { event_id: event_id.into() }),
            ..RelatesTo::default()
        });
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NameContent {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicContent {
    pub topic: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinRule {
    Public,
    Knock,
    Invite,
    Private,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinRulesContent {
    pub join_rule: JoinRule,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalAliasContent {
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub alt_aliases: Vec<String>,
}

/// 应用注册的自定义事件内容
#[derive(Clone)]
pub struct CustomContent {
    pub event_type: String,
    value: Arc<dyn Any + Send + Sync>,
}

impl CustomContent {
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }
}

impl fmt::Debug for CustomContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomContent")
            .field("event_type", &self.event_type)
            .finish_non_exhaustive()
    }
}

/// 事件内容（封闭和类型 + Unknown 兜底）
#[derive(Debug, Clone)]
pub enum EventContent {
    Create(CreateContent),
    Member(MemberContent),
    Message(MessageContent),
    Name(NameContent),
    Topic(TopicContent),
    JoinRules(JoinRulesContent),
    CanonicalAlias(CanonicalAliasContent),
    Custom(CustomContent),
    Unknown(Value),
}

impl EventContent {
    pub fn as_member(&self) -> Option<&MemberContent> {
        match self {
            EventContent::Member(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_message(&self) -> Option<&MessageContent> {
        match self {
            EventContent::Message(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_create(&self) -> Option<&CreateContent> {
        match self {
            EventContent::Create(c) => Some(c),
            _ => None,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, EventContent::Unknown(_))
    }
}

/// 自定义内容转换器
pub type ContentConverter =
    Arc<dyn Fn(&Value) -> Result<Arc<dyn Any + Send + Sync>> + Send + Sync>;

/// 事件内容解析注册表
///
/// 已知类型由内置解析器处理；其它类型先查自定义转换器，再退化为 `Unknown`。
#[derive(Clone, Default)]
pub struct ContentRegistry {
    custom: HashMap<String, ContentConverter>,
}

impl ContentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册自定义事件类型的转换器
    pub fn register<T, F>(&mut self, event_type: impl Into<String>, converter: F)
    where
        T: Any + Send + Sync,
        F: Fn(&Value) -> Result<T> + Send + Sync + 'static,
    {
        let event_type = event_type.into();
        debug!("注册自定义事件转换器: event_type={}", event_type);
        self.custom.insert(
            event_type,
            Arc::new(move |raw: &Value| converter(raw).map(|v| Arc::new(v) as Arc<dyn Any + Send + Sync>)),
        );
    }

    /// 以 serde 反序列化的方式注册自定义类型
    pub fn register_deserialize<T>(&mut self, event_type: impl Into<String>)
    where
        T: DeserializeOwned + Any + Send + Sync,
    {
        self.register(event_type, |raw: &Value| {
            Ok(serde_json::from_value::<T>(raw.clone())?)
        });
    }

    pub fn is_registered(&self, event_type: &str) -> bool {
        self.custom.contains_key(event_type)
    }

    /// 把原始 JSON 内容解析成 [`EventContent`]，永不失败
    pub fn parse(&self, event_type: &str, raw: Value) -> EventContent {
        let parsed = match event_type {
            ROOM_CREATE => from_value(raw.clone()).map(EventContent::Create),
            ROOM_MEMBER => from_value(raw.clone()).map(EventContent::Member),
            ROOM_MESSAGE => from_value(raw.clone()).map(EventContent::Message),
            ROOM_NAME => from_value(raw.clone()).map(EventContent::Name),
            ROOM_TOPIC => from_value(raw.clone()).map(EventContent::Topic),
            ROOM_JOIN_RULES => from_value(raw.clone()).map(EventContent::JoinRules),
            ROOM_CANONICAL_ALIAS => from_value(raw.clone()).map(EventContent::CanonicalAlias),
            other => match self.custom.get(other) {
                Some(converter) => converter(&raw).map(|value| {
                    EventContent::Custom(CustomContent {
                        event_type: other.to_string(),
                        value,
                    })
                }),
                None => return EventContent::Unknown(raw),
            },
        };

        match parsed {
            Ok(content) => content,
            Err(e) => {
                warn!("事件内容解析失败，按 Unknown 处理: event_type={}, error={}", event_type, e);
                EventContent::Unknown(raw)
            }
        }
    }
}

fn from_value<T: DeserializeOwned>(raw: Value) -> Result<T> {
    Ok(serde_json::from_value(raw)?)
}
