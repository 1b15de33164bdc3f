//! 测试辅助：事件构造器与脚本化的传输层

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::content::{
    CreateContent, EventContent, MemberContent, Membership, MessageContent, NameContent, ROOM_CREATE,
    ROOM_MEMBER, ROOM_MESSAGE, ROOM_NAME,
};
use crate::error::{Result, SdkError};
use crate::identifier::{Identifier, Sigil};
use crate::transport::MatrixTransport;
use crate::types::{EventPage, RoomEvent, SyncBatch};

pub const TEST_DOMAIN: &str = "example.org";

pub fn room_id(localpart: &str) -> Identifier {
    Identifier::new(Sigil::Room, localpart, TEST_DOMAIN)
}

pub fn user_id(localpart: &str) -> Identifier {
    Identifier::new(Sigil::User, localpart, TEST_DOMAIN)
}

fn event(
    room: &Identifier,
    event_id: &str,
    sender: &Identifier,
    event_type: &str,
    state_key: Option<&str>,
    content: EventContent,
) -> Arc<RoomEvent> {
    Arc::new(RoomEvent {
        event_type: event_type.to_string(),
        state_key: state_key.map(str::to_string),
        sender: sender.clone(),
        content,
        event_id: event_id.to_string(),
        origin_server_ts: 0,
        room_id: room.clone(),
    })
}

pub fn create_event(room: &Identifier, event_id: &str, creator: &Identifier) -> Arc<RoomEvent> {
    let content = CreateContent {
        creator: Some(creator.clone()),
        federate: true,
        room_version: "1".to_string(),
        predecessor: None,
    };
    event(room, event_id, creator, ROOM_CREATE, Some(""), EventContent::Create(content))
}

pub fn member_event(
    room: &Identifier,
    event_id: &str,
    target: &Identifier,
    sender: &Identifier,
    membership: Membership,
) -> Arc<RoomEvent> {
    event(
        room,
        event_id,
        sender,
        ROOM_MEMBER,
        Some(target.as_str()),
        EventContent::Member(MemberContent::new(membership)),
    )
}

pub fn name_event(room: &Identifier, event_id: &str, sender: &Identifier, name: &str) -> Arc<RoomEvent> {
    let content = NameContent { name: name.to_string() };
    event(room, event_id, sender, ROOM_NAME, Some(""), EventContent::Name(content))
}

pub fn message_event(room: &Identifier, event_id: &str, sender: &Identifier, body: &str) -> Arc<RoomEvent> {
    let content = MessageContent::text(body);
    event(room, event_id, sender, ROOM_MESSAGE, None, EventContent::Message(content))
}

pub fn reply_event(
    room: &Identifier,
    event_id: &str,
    sender: &Identifier,
    body: &str,
    in_reply_to: &str,
) -> Arc<RoomEvent> {
    let content = MessageContent::text(body).with_reply_to(in_reply_to);
    event(room, event_id, sender, ROOM_MESSAGE, None, EventContent::Message(content))
}

/// 轮询等待条件成立，最多约 2 秒
pub async fn wait_until<F: Fn() -> bool>(condition: F) -> bool {
    for _ in 0..400 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

/// 脚本化的传输层
///
/// - `sync`：按顺序返回脚本；脚本用完后等待长轮询超时再返回空批次
/// - `get_events`：按 "room_id/token" 返回预置分页，未预置返回传输错误
/// - `get_event`：从预置事件表查找，未找到返回传输错误
pub struct MockTransport {
    me: Identifier,
    sync_script: Mutex<VecDeque<Result<SyncBatch>>>,
    sync_delay: Mutex<Option<Duration>>,
    pages: Mutex<HashMap<String, EventPage>>,
    events: Mutex<HashMap<String, Arc<RoomEvent>>>,
    sync_calls: AtomicUsize,
    get_events_calls: AtomicUsize,
    get_event_calls: AtomicUsize,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            me: user_id("bot"),
            sync_script: Mutex::new(VecDeque::new()),
            sync_delay: Mutex::new(None),
            pages: Mutex::new(HashMap::new()),
            events: Mutex::new(HashMap::new()),
            sync_calls: AtomicUsize::new(0),
            get_events_calls: AtomicUsize::new(0),
            get_event_calls: AtomicUsize::new(0),
        }
    }

    pub fn push_sync(&self, batch: SyncBatch) {
        self.sync_script.lock().push_back(Ok(batch));
    }

    pub fn push_sync_error(&self, error: SdkError) {
        self.sync_script.lock().push_back(Err(error));
    }

    /// 每次 `sync` 调用前的额外延迟
    pub fn set_sync_delay(&self, delay: Option<Duration>) {
        *self.sync_delay.lock() = delay;
    }

    /// 预置房间历史（从新到旧），按 `page_size` 切页，令牌为 "t{偏移}"
    pub fn set_history(&self, room: &Identifier, newest_first: Vec<Arc<RoomEvent>>, page_size: usize) {
        let mut pages = self.pages.lock();
        let total = newest_first.len();
        let mut offset = 0;
        for chunk in newest_first.chunks(page_size) {
            let next = offset + chunk.len();
            let end = (next < total).then(|| format!("t{}", next));
            pages.insert(
                format!("{}/t{}", room, offset),
                EventPage {
                    chunk: chunk.to_vec(),
                    end,
                },
            );
            offset = next;
        }
    }

    pub fn insert_event(&self, event: Arc<RoomEvent>) {
        self.events.lock().insert(event.event_id.clone(), event);
    }

    pub fn sync_calls(&self) -> usize {
        self.sync_calls.load(Ordering::SeqCst)
    }

    pub fn get_events_calls(&self) -> usize {
        self.get_events_calls.load(Ordering::SeqCst)
    }

    pub fn get_event_calls(&self) -> usize {
        self.get_event_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MatrixTransport for MockTransport {
    async fn whoami(&self) -> Result<Identifier> {
        Ok(self.me.clone())
    }

    async fn sync(&self, since: Option<&str>, timeout_ms: Option<u64>, _filter: &str) -> Result<SyncBatch> {
        self.sync_calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.sync_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self.sync_script.lock().pop_front();
        match scripted {
            Some(result) => result,
            None => {
                tokio::time::sleep(Duration::from_millis(timeout_ms.unwrap_or(0))).await;
                Ok(SyncBatch {
                    next_batch: since.unwrap_or("s0").to_string(),
                    joined: Vec::new(),
                })
            }
        }
    }

    async fn get_events(
        &self,
        room_id: &Identifier,
        from_token: &str,
        _reverse: bool,
        _limit: usize,
    ) -> Result<EventPage> {
        self.get_events_calls.fetch_add(1, Ordering::SeqCst);
        self.pages
            .lock()
            .get(&format!("{}/{}", room_id, from_token))
            .cloned()
            .ok_or_else(|| SdkError::Transport(format!("no page for token {}", from_token)))
    }

    async fn get_event(&self, _room_id: &Identifier, event_id: &str) -> Result<Arc<RoomEvent>> {
        self.get_event_calls.fetch_add(1, Ordering::SeqCst);
        self.events
            .lock()
            .get(event_id)
            .cloned()
            .ok_or_else(|| SdkError::Transport(format!("event {} not found", event_id)))
    }
}
