/// 成员变更推断
///
/// 职责：
/// - 根据变更前快照中的 membership 和新事件的 membership 推断语义变更
/// - 自己 / 他人操作只通过比较 sender 与 state_key 判定
/// - 不在转换表中的组合（例如 join -> join 的资料修改）记录日志后返回 None

use std::sync::Arc;

use tracing::{debug, warn};

use crate::content::Membership;
use crate::events::ClientEvent;
use crate::identifier::Identifier;
use crate::state::RoomSnapshot;
use crate::types::RoomEvent;

/// 推断出的成员变更
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipTransition {
    Joined { member_id: Identifier, was_invited: bool },
    Left { member_id: Identifier },
    Kicked { kicked_id: Identifier, kicker_id: Identifier },
    Banned { banned_id: Identifier, banner_id: Identifier, was_in_room: bool },
    Unbanned { unbanned_id: Identifier, unbanner_id: Identifier },
    Invited { invitee_id: Identifier, inviter_id: Identifier },
    InviteRejected { invitee_id: Identifier },
    InviteRevoked { invitee_id: Identifier, revoker_id: Identifier },
}

impl MembershipTransition {
    /// 附上房间快照，转换成对外事件
    pub fn into_client_event(self, room: Arc<RoomSnapshot>) -> ClientEvent {
        match self {
            MembershipTransition::Joined { member_id, was_invited } => ClientEvent::MemberJoined {
                room,
                member_id,
                was_invited,
            },
            MembershipTransition::Left { member_id } => ClientEvent::MemberLeft { room, member_id },
            MembershipTransition::Kicked { kicked_id, kicker_id } => ClientEvent::MemberKicked {
                room,
                kicked_id,
                kicker_id,
            },
            MembershipTransition::Banned { banned_id, banner_id, was_in_room } => ClientEvent::MemberBanned {
                room,
                banned_id,
                banner_id,
                was_in_room,
            },
            MembershipTransition::Unbanned { unbanned_id, unbanner_id } => ClientEvent::MemberUnbanned {
                room,
                unbanned_id,
                unbanner_id,
            },
            MembershipTransition::Invited { invitee_id, inviter_id } => ClientEvent::MemberInvited {
                room,
                invitee_id,
                inviter_id,
            },
            MembershipTransition::InviteRejected { invitee_id } => {
                ClientEvent::MemberInviteRejected { room, invitee_id }
            }
            MembershipTransition::InviteRevoked { invitee_id, revoker_id } => ClientEvent::MemberInviteRevoked {
                room,
                invitee_id,
                revoker_id,
            },
        }
    }
}

/// 转换表
///
/// `prev` 为 None 表示成员此前不在状态中（从未出现或已离开）。
pub fn resolve_transition(
    prev: Option<Membership>,
    new: Membership,
    affected: &Identifier,
    sender: &Identifier,
) -> Option<MembershipTransition> {
    use Membership::*;

    let by_self = affected == sender;
    let prev_or_leave = prev.unwrap_or(Leave);

    let transition = match (prev_or_leave, new) {
        (before, Ban) => MembershipTransition::Banned {
            banned_id: affected.clone(),
            banner_id: sender.clone(),
            was_in_room: before == Join,
        },
        (Leave, Join) => MembershipTransition::Joined {
            member_id: affected.clone(),
            was_invited: false,
        },
        (Invite, Join) => MembershipTransition::Joined {
            member_id: affected.clone(),
            was_invited: true,
        },
        (Invite, Leave) if by_self => MembershipTransition::InviteRejected {
            invitee_id: affected.clone(),
        },
        (Invite, Leave) => MembershipTransition::InviteRevoked {
            invitee_id: affected.clone(),
            revoker_id: sender.clone(),
        },
        (Join, Leave) if by_self => MembershipTransition::Left {
            member_id: affected.clone(),
        },
        (Join, Leave) => MembershipTransition::Kicked {
            kicked_id: affected.clone(),
            kicker_id: sender.clone(),
        },
        (Leave, Invite) => MembershipTransition::Invited {
            invitee_id: affected.clone(),
            inviter_id: sender.clone(),
        },
        (Ban, Leave) => MembershipTransition::Unbanned {
            unbanned_id: affected.clone(),
            unbanner_id: sender.clone(),
        },
        (Join, Join) => {
            debug!("成员资料变更，不产生事件: user_id={}", affected);
            return None;
        }
        (before, after) => {
            warn!(
                "不支持的成员变更: user_id={}, sender={}, {} -> {}",
                affected, sender, before, after
            );
            return None;
        }
    };

    Some(transition)
}

/// 解析一条成员事件
///
/// 变更前的 membership 从 `before` 快照中按事件的 state_key 读取。
pub fn resolve_member_event(before: &RoomSnapshot, event: &RoomEvent) -> Option<MembershipTransition> {
    let Some(new) = event.membership() else {
        debug!("成员事件内容无法解析，跳过: event_id={}", event.event_id);
        return None;
    };
    let state_key = event.state_key.as_deref()?;
    let affected = match Identifier::parse(state_key) {
        Ok(id) => id,
        Err(e) => {
            warn!("成员事件 state_key 不是合法用户 ID: event_id={}, error={}", event.event_id, e);
            return None;
        }
    };

    let prev = before.membership_of(&affected);
    resolve_transition(prev, new, &affected, &event.sender)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::RoomState;
    use crate::test_support::{member_event, room_id, user_id};
    use Membership::*;

    fn resolve(prev: Option<Membership>, new: Membership, by_self: bool) -> Option<MembershipTransition> {
        let affected = user_id("b");
        let sender = if by_self { user_id("b") } else { user_id("mod") };
        resolve_transition(prev, new, &affected, &sender)
    }

    #[test]
    fn test_join_transitions() {
        for prev in [None, Some(Leave)] {
            assert_eq!(
                resolve(prev, Join, true),
                Some(MembershipTransition::Joined { member_id: user_id("b"), was_invited: false })
            );
        }
        assert_eq!(
            resolve(Some(Invite), Join, true),
            Some(MembershipTransition::Joined { member_id: user_id("b"), was_invited: true })
        );
    }

    #[test]
    fn test_leave_transitions() {
        assert_eq!(
            resolve(Some(Join), Leave, true),
            Some(MembershipTransition::Left { member_id: user_id("b") })
        );
        assert_eq!(
            resolve(Some(Join), Leave, false),
            Some(MembershipTransition::Kicked { kicked_id: user_id("b"), kicker_id: user_id("mod") })
        );
        assert_eq!(
            resolve(Some(Invite), Leave, true),
            Some(MembershipTransition::InviteRejected { invitee_id: user_id("b") })
        );
        assert_eq!(
            resolve(Some(Invite), Leave, false),
            Some(MembershipTransition::InviteRevoked { invitee_id: user_id("b"), revoker_id: user_id("mod") })
        );
        assert_eq!(
            resolve(Some(Ban), Leave, false),
            Some(MembershipTransition::Unbanned { unbanned_id: user_id("b"), unbanner_id: user_id("mod") })
        );
    }

    #[test]
    fn test_invite_transitions() {
        for prev in [None, Some(Leave)] {
            assert_eq!(
                resolve(prev, Invite, false),
                Some(MembershipTransition::Invited { invitee_id: user_id("b"), inviter_id: user_id("mod") })
            );
        }
    }

    #[test]
    fn test_ban_from_any_state() {
        for prev in [None, Some(Leave), Some(Invite), Some(Join), Some(Knock), Some(Ban)] {
            let result = resolve(prev, Ban, false);
            assert_eq!(
                result,
                Some(MembershipTransition::Banned {
                    banned_id: user_id("b"),
                    banner_id: user_id("mod"),
                    was_in_room: prev == Some(Join),
                })
            );
        }
    }

    #[test]
    fn test_unmatched_pairs_yield_none() {
        assert_eq!(resolve(Some(Join), Join, true), None);
        assert_eq!(resolve(Some(Join), Invite, false), None);
        assert_eq!(resolve(Some(Ban), Join, true), None);
        assert_eq!(resolve(None, Leave, true), None);
        assert_eq!(resolve(None, Knock, true), None);
    }

    #[test]
    fn test_resolve_member_event_reads_before_snapshot() {
        let room = room_id("r");
        let bob = user_id("b");
        let mut state = RoomState::new();
        state.apply(member_event(&room, "$1", &bob, &bob, Join));
        let before = state.snapshot(&room, None);

        let leave = member_event(&room, "$2", &bob, &bob, Leave);
        let transition = resolve_member_event(&before, &leave).unwrap();
        assert_eq!(transition, MembershipTransition::Left { member_id: bob.clone() });

        let event = transition.into_client_event(Arc::new(state.snapshot(&room, None)));
        assert_eq!(event.user_id(), Some(&bob));
    }
}
