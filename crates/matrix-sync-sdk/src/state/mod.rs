/// 房间状态模块
///
/// 职责：
/// - 单个房间的状态存储与快照（room_state）
/// - 会话级全局状态：房间表、同步游标、最近事件缓存（global）

pub mod room_state;
pub mod global;

pub use room_state::{RoomSnapshot, RoomState};
pub use global::{GlobalState, RecentEventCache, Room, DEFAULT_RECENT_EVENT_CAPACITY};
