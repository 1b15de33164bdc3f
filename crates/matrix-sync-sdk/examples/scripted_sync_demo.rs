//! 同步引擎演示
//!
//! 用一个回放 JSON 响应的内存传输层驱动 MatrixClient，打印解析出的语义事件。

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use matrix_sync_sdk::content::ContentRegistry;
use matrix_sync_sdk::transport::{decode_sync_response, decode_whoami};
use matrix_sync_sdk::{
    ClientConfig, ClientEvent, EventPage, Identifier, MatrixClient, MatrixTransport, Result, RoomEvent, SdkError,
    SyncBatch,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::time::{sleep, Duration};

/// 按顺序回放 `/sync` 响应体
struct ReplayTransport {
    responses: Mutex<VecDeque<Value>>,
    registry: ContentRegistry,
}

#[async_trait]
impl MatrixTransport for ReplayTransport {
    async fn whoami(&self) -> Result<Identifier> {
        decode_whoami(&json!({"user_id": "@demo:example.org"}))
    }

    async fn sync(&self, since: Option<&str>, timeout_ms: Option<u64>, _filter: &str) -> Result<SyncBatch> {
        let next = self.responses.lock().pop_front();
        match next {
            Some(raw) => decode_sync_response(&raw, &self.registry),
            None => {
                sleep(Duration::from_millis(timeout_ms.unwrap_or(0))).await;
                Ok(SyncBatch {
                    next_batch: since.unwrap_or_default().to_string(),
                    joined: Vec::new(),
                })
            }
        }
    }

    async fn get_events(&self, _room_id: &Identifier, _from: &str, _reverse: bool, _limit: usize) -> Result<EventPage> {
        Ok(EventPage::default())
    }

    async fn get_event(&self, _room_id: &Identifier, event_id: &str) -> Result<Arc<RoomEvent>> {
        Err(SdkError::NotFound(event_id.to_string()))
    }
}

fn member(user: &str, sender: &str, membership: &str, event_id: &str) -> Value {
    json!({
        "type": "m.room.member", "state_key": user, "sender": sender,
        "content": {"membership": membership}, "event_id": event_id, "origin_server_ts": 0
    })
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let initial = json!({
        "next_batch": "s1",
        "rooms": {"join": {"!lobby:example.org": {
            "state": {"events": [
                {"type": "m.room.create", "state_key": "", "sender": "@alice:example.org",
                 "content": {"creator": "@alice:example.org"}, "event_id": "$create"},
                {"type": "m.room.name", "state_key": "", "sender": "@alice:example.org",
                 "content": {"name": "Lobby"}, "event_id": "$name"},
                member("@alice:example.org", "@alice:example.org", "join", "$j1"),
                member("@demo:example.org", "@demo:example.org", "join", "$j2"),
            ]},
            "timeline": {"events": [], "limited": false}
        }}}
    });
    let update = json!({
        "next_batch": "s2",
        "rooms": {"join": {"!lobby:example.org": {
            "timeline": {"events": [
                member("@bob:example.org", "@alice:example.org", "invite", "$i1"),
                member("@bob:example.org", "@bob:example.org", "join", "$j3"),
                {"type": "m.room.message", "sender": "@bob:example.org",
                 "content": {"msgtype": "m.text", "body": "hello"}, "event_id": "$m1"},
                member("@bob:example.org", "@alice:example.org", "ban", "$b1"),
            ]}
        }}}
    });

    let transport = Arc::new(ReplayTransport {
        responses: Mutex::new(VecDeque::from(vec![initial, update])),
        registry: ContentRegistry::new(),
    });
    let config = ClientConfig::builder().server_timeout_ms(200).build()?;
    let client = Arc::new(MatrixClient::new(transport, config)?);

    client.subscribe_all_fn(|event| async move {
        match &event {
            ClientEvent::MessageReceived { message, room } => {
                let sender = room.display_name(&message.sender).unwrap_or_default();
                let body = message.content.as_message().map(|c| c.body.clone()).unwrap_or_default();
                println!("[{}] {}: {}", room.name().unwrap_or("?"), sender, body);
            }
            other => println!("[{}] {} {:?}", other.room_id(), other.event_type(), other.user_id()),
        }
        Ok(())
    });

    let runner = {
        let client = client.clone();
        tokio::spawn(async move { client.run().await })
    };

    sleep(Duration::from_secs(1)).await;
    if let Some(room) = client.find_room_by_name("Lobby").await {
        println!("Lobby 成员数: {}", room.joined_member_count());
    }

    client.shutdown();
    runner.await??;
    Ok(())
}
