//! 语义事件模块
//!
//! 同步引擎把原始协议增量转换成应用层事件：
//! - 消息接收 / 回复
//! - 本端加入房间
//! - 成员加入、离开、被踢、封禁、解封、邀请、拒绝邀请、撤回邀请
//! - 临时事件（typing、回执），可在分发繁忙时丢弃

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::identifier::Identifier;
use crate::state::RoomSnapshot;
use crate::types::{EphemeralEvent, RoomEvent};

/// 事件类型标签，用于按类型订阅
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClientEventType {
    MessageReceived,
    MessageReply,
    RoomJoinedByMe,
    MemberJoined,
    MemberLeft,
    MemberKicked,
    MemberBanned,
    MemberUnbanned,
    MemberInvited,
    MemberInviteRejected,
    MemberInviteRevoked,
    Ephemeral,
}

impl ClientEventType {
    pub fn as_str(self) -> &'static str {
        match self {
            ClientEventType::MessageReceived => "message_received",
            ClientEventType::MessageReply => "message_reply",
            ClientEventType::RoomJoinedByMe => "room_joined_by_me",
            ClientEventType::MemberJoined => "member_joined",
            ClientEventType::MemberLeft => "member_left",
            ClientEventType::MemberKicked => "member_kicked",
            ClientEventType::MemberBanned => "member_banned",
            ClientEventType::MemberUnbanned => "member_unbanned",
            ClientEventType::MemberInvited => "member_invited",
            ClientEventType::MemberInviteRejected => "member_invite_rejected",
            ClientEventType::MemberInviteRevoked => "member_invite_revoked",
            ClientEventType::Ephemeral => "ephemeral",
        }
    }
}

impl fmt::Display for ClientEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 应用层语义事件
///
/// 每个事件都携带产生它的那条原始事件应用之后的房间快照。
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// 收到消息
    MessageReceived {
        room: Arc<RoomSnapshot>,
        message: Arc<RoomEvent>,
    },
    /// 收到回复消息
    ///
    /// `replied_to` 先查最近事件缓存，未命中再按 ID 拉取一次；拉取失败时为 None。
    MessageReply {
        room: Arc<RoomSnapshot>,
        message: Arc<RoomEvent>,
        in_reply_to: String,
        replied_to: Option<Arc<RoomEvent>>,
    },
    /// 本端加入了一个新房间（首次在同步中出现）
    RoomJoinedByMe {
        room: Arc<RoomSnapshot>,
    },
    MemberJoined {
        room: Arc<RoomSnapshot>,
        member_id: Identifier,
        was_invited: bool,
    },
    MemberLeft {
        room: Arc<RoomSnapshot>,
        member_id: Identifier,
    },
    MemberKicked {
        room: Arc<RoomSnapshot>,
        kicked_id: Identifier,
        kicker_id: Identifier,
    },
    MemberBanned {
        room: Arc<RoomSnapshot>,
        banned_id: Identifier,
        banner_id: Identifier,
        /// 被封禁前是否已加入（邀请后被封禁时为 false）
        was_in_room: bool,
    },
    MemberUnbanned {
        room: Arc<RoomSnapshot>,
        unbanned_id: Identifier,
        unbanner_id: Identifier,
    },
    MemberInvited {
        room: Arc<RoomSnapshot>,
        invitee_id: Identifier,
        inviter_id: Identifier,
    },
    MemberInviteRejected {
        room: Arc<RoomSnapshot>,
        invitee_id: Identifier,
    },
    MemberInviteRevoked {
        room: Arc<RoomSnapshot>,
        invitee_id: Identifier,
        revoker_id: Identifier,
    },
    /// 临时事件（不重要事件，繁忙时可丢弃）
    Ephemeral {
        room: Arc<RoomSnapshot>,
        event: EphemeralEvent,
    },
}

impl ClientEvent {
    /// 获取事件类型标签
    pub fn event_type(&self) -> ClientEventType {
        match self {
            ClientEvent::MessageReceived { .. } => ClientEventType::MessageReceived,
            ClientEvent::MessageReply { .. } => ClientEventType::MessageReply,
            ClientEvent::RoomJoinedByMe { .. } => ClientEventType::RoomJoinedByMe,
            ClientEvent::MemberJoined { .. } => ClientEventType::MemberJoined,
            ClientEvent::MemberLeft { .. } => ClientEventType::MemberLeft,
            ClientEvent::MemberKicked { .. } => ClientEventType::MemberKicked,
            ClientEvent::MemberBanned { .. } => ClientEventType::MemberBanned,
            ClientEvent::MemberUnbanned { .. } => ClientEventType::MemberUnbanned,
            ClientEvent::MemberInvited { .. } => ClientEventType::MemberInvited,
            ClientEvent::MemberInviteRejected { .. } => ClientEventType::MemberInviteRejected,
            ClientEvent::MemberInviteRevoked { .. } => ClientEventType::MemberInviteRevoked,
            ClientEvent::Ephemeral { .. } => ClientEventType::Ephemeral,
        }
    }

    /// 事件所属房间的快照
    pub fn room(&self) -> &Arc<RoomSnapshot> {
        match self {
            ClientEvent::MessageReceived { room, .. }
            | ClientEvent::MessageReply { room, .. }
            | ClientEvent::RoomJoinedByMe { room }
            | ClientEvent::MemberJoined { room, .. }
            | ClientEvent::MemberLeft { room, .. }
            | ClientEvent::MemberKicked { room, .. }
            | ClientEvent::MemberBanned { room, .. }
            | ClientEvent::MemberUnbanned { room, .. }
            | ClientEvent::MemberInvited { room, .. }
            | ClientEvent::MemberInviteRejected { room, .. }
            | ClientEvent::MemberInviteRevoked { room, .. }
            | ClientEvent::Ephemeral { room, .. } => room,
        }
    }

    pub fn room_id(&self) -> &Identifier {
        self.room().room_id()
    }

    /// 不重要事件：分发并发已满时直接丢弃
    pub fn is_insignificant(&self) -> bool {
        matches!(self, ClientEvent::Ephemeral { .. })
    }

    /// 事件直接涉及的用户（消息发送者 / 成员变更的目标）
    pub fn user_id(&self) -> Option<&Identifier> {
        match self {
            ClientEvent::MessageReceived { message, .. } => Some(&message.sender),
            ClientEvent::MessageReply { message, .. } => Some(&message.sender),
            ClientEvent::MemberJoined { member_id, .. } => Some(member_id),
            ClientEvent::MemberLeft { member_id, .. } => Some(member_id),
            ClientEvent::MemberKicked { kicked_id, .. } => Some(kicked_id),
            ClientEvent::MemberBanned { banned_id, .. } => Some(banned_id),
            ClientEvent::MemberUnbanned { unbanned_id, .. } => Some(unbanned_id),
            ClientEvent::MemberInvited { invitee_id, .. } => Some(invitee_id),
            ClientEvent::MemberInviteRejected { invitee_id, .. } => Some(invitee_id),
            ClientEvent::MemberInviteRevoked { invitee_id, .. } => Some(invitee_id),
            ClientEvent::RoomJoinedByMe { .. } | ClientEvent::Ephemeral { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::RoomState;
    use crate::test_support::{message_event, room_id, user_id};

    #[test]
    fn test_event_accessors() {
        let room = room_id("r");
        let alice = user_id("a");
        let snapshot = Arc::new(RoomState::new().snapshot(&room, None));

        let message = ClientEvent::MessageReceived {
            room: snapshot.clone(),
            message: message_event(&room, "$m", &alice, "hi"),
        };
        assert_eq!(message.event_type(), ClientEventType::MessageReceived);
        assert_eq!(message.room_id(), &room);
        assert_eq!(message.user_id(), Some(&alice));
        assert!(!message.is_insignificant());

        let typing = ClientEvent::Ephemeral {
            room: snapshot,
            event: EphemeralEvent {
                event_type: "m.typing".to_string(),
                content: serde_json::json!({"user_ids": [alice.as_str()]}),
            },
        };
        assert_eq!(typing.event_type().as_str(), "ephemeral");
        assert!(typing.is_insignificant());
        assert_eq!(typing.user_id(), None);
    }
}
