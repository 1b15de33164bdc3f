//! 事件总线
//!
//! 单一分发循环从内部队列逐个取出事件，为每个匹配的处理器启动一个
//! 受并发上限约束的任务：
//! - 通配处理器总是匹配；类型处理器按事件标签精确匹配
//! - 不重要事件在并发槽位耗尽时整体丢弃，不排队
//! - 重要事件阻塞分发循环直到有空闲槽位（背压）
//! - 每次处理器调用相互隔离：错误和 panic 只记录日志

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{Result, SdkError};
use crate::events::{ClientEvent, ClientEventType};

/// 默认最大并发处理数
pub const DEFAULT_DISPATCH_CONCURRENCY: usize = 64;

/// 默认事件队列容量
pub const DEFAULT_EVENT_QUEUE_CAPACITY: usize = 100;

/// 事件处理器
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: ClientEvent) -> Result<()>;
}

/// 闭包形式的处理器
struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(ClientEvent) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn handle(&self, event: ClientEvent) -> Result<()> {
        (self.0)(event).await
    }
}

/// 订阅 ID，用于取消订阅
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

type HandlerEntry = (SubscriptionId, Arc<dyn EventHandler>);

#[derive(Default)]
struct HandlerRegistry {
    typed: HashMap<ClientEventType, Vec<HandlerEntry>>,
    wildcard: Vec<HandlerEntry>,
}

impl HandlerRegistry {
    /// 匹配的处理器：先通配，再类型
    fn matching(&self, event_type: ClientEventType) -> Vec<Arc<dyn EventHandler>> {
        self.wildcard
            .iter()
            .chain(self.typed.get(&event_type).into_iter().flatten())
            .map(|(_, handler)| handler.clone())
            .collect()
    }

    fn len(&self) -> usize {
        self.wildcard.len() + self.typed.values().map(Vec::len).sum::<usize>()
    }
}

/// 分发统计信息
#[derive(Debug, Clone, Default)]
pub struct DispatchStats {
    /// 入队事件数
    pub published: u64,
    /// 启动的处理器调用数
    pub invocations: u64,
    /// 因繁忙被丢弃的事件数
    pub dropped: u64,
    /// 失败（返回错误或 panic）的处理器调用数
    pub failed: u64,
    /// 按类型分组的分发事件数
    pub events_by_type: HashMap<String, u64>,
}

/// 事件总线
pub struct EventBus {
    sender: mpsc::Sender<ClientEvent>,
    /// 分发循环运行期间被取走
    receiver: tokio::sync::Mutex<Option<mpsc::Receiver<ClientEvent>>>,
    handlers: RwLock<HandlerRegistry>,
    limiter: Arc<Semaphore>,
    concurrency: usize,
    stats: Arc<Mutex<DispatchStats>>,
}

impl EventBus {
    pub fn new(concurrency: usize, queue_capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(queue_capacity.max(1));
        Self {
            sender,
            receiver: tokio::sync::Mutex::new(Some(receiver)),
            handlers: RwLock::new(HandlerRegistry::default()),
            limiter: Arc::new(Semaphore::new(concurrency)),
            concurrency,
            stats: Arc::new(Mutex::new(DispatchStats::default())),
        }
    }

    /// 订阅特定类型的事件
    pub fn subscribe(&self, event_type: ClientEventType, handler: Arc<dyn EventHandler>) -> SubscriptionId {
        let id = SubscriptionId::new();
        self.handlers
            .write()
            .typed
            .entry(event_type)
            .or_default()
            .push((id, handler));
        debug!("Added handler for event type: {}", event_type);
        id
    }

    /// 订阅全部事件
    pub fn subscribe_all(&self, handler: Arc<dyn EventHandler>) -> SubscriptionId {
        let id = SubscriptionId::new();
        self.handlers.write().wildcard.push((id, handler));
        info!("Added handler for all events");
        id
    }

    pub fn subscribe_fn<F, Fut>(&self, event_type: ClientEventType, handler: F) -> SubscriptionId
    where
        F: Fn(ClientEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.subscribe(event_type, Arc::new(FnHandler(handler)))
    }

    pub fn subscribe_all_fn<F, Fut>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(ClientEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.subscribe_all(Arc::new(FnHandler(handler)))
    }

    /// 取消订阅，返回是否找到
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write();
        let before = handlers.len();
        handlers.wildcard.retain(|(sub, _)| *sub != id);
        for entries in handlers.typed.values_mut() {
            entries.retain(|(sub, _)| *sub != id);
        }
        handlers.len() != before
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.read().len()
    }

    /// 当前空闲的并发槽位
    pub fn available_slots(&self) -> usize {
        self.limiter.available_permits()
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats.lock().clone()
    }

    /// 事件入队；队列满时等待（向同步循环传递背压）
    pub async fn publish(&self, event: ClientEvent) -> Result<()> {
        self.sender
            .send(event)
            .await
            .map_err(|_| SdkError::ShuttingDown("event queue closed".to_string()))?;
        self.stats.lock().published += 1;
        Ok(())
    }

    /// 分发循环，直到 `shutdown` 被取消
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let mut receiver = self
            .receiver
            .lock()
            .await
            .take()
            .ok_or_else(|| SdkError::Other("dispatch loop is already running".to_string()))?;

        info!("事件分发循环启动: concurrency={}", self.concurrency);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("事件分发循环收到关闭信号");
                    break;
                }
                next = receiver.recv() => match next {
                    Some(event) => self.dispatch(event).await,
                    None => break,
                },
            }
        }

        // 放回接收端，允许再次启动
        *self.receiver.lock().await = Some(receiver);
        Ok(())
    }

    /// 分发单个事件
    pub async fn dispatch(&self, event: ClientEvent) {
        let event_type = event.event_type();
        debug!("Dispatching event: {}", event_type);

        if event.is_insignificant() && self.limiter.available_permits() == 0 {
            debug!("分发繁忙，丢弃不重要事件: {}", event_type);
            self.stats.lock().dropped += 1;
            return;
        }

        let handlers = self.handlers.read().matching(event_type);
        {
            let mut stats = self.stats.lock();
            *stats.events_by_type.entry(event_type.to_string()).or_insert(0) += 1;
        }

        for handler in handlers {
            let permit = match self.limiter.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    warn!("并发限制器已关闭，停止分发: {}", e);
                    return;
                }
            };

            self.stats.lock().invocations += 1;
            let stats = self.stats.clone();
            let event = event.clone();

            tokio::spawn(async move {
                let _permit = permit;
                let outcome = AssertUnwindSafe(handler.handle(event)).catch_unwind().await;
                match outcome {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        error!("事件处理器执行失败: event_type={}, error={}", event_type, e);
                        stats.lock().failed += 1;
                    }
                    Err(panic) => {
                        let reason = panic
                            .downcast_ref::<&str>()
                            .map(|s| s.to_string())
                            .or_else(|| panic.downcast_ref::<String>().cloned())
                            .unwrap_or_else(|| "unknown panic".to_string());
                        error!("事件处理器 panic: event_type={}, reason={}", event_type, reason);
                        stats.lock().failed += 1;
                    }
                }
            });
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_DISPATCH_CONCURRENCY, DEFAULT_EVENT_QUEUE_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::RoomState;
    use crate::test_support::{room_id, user_id, wait_until};
    use crate::types::EphemeralEvent;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    fn snapshot() -> Arc<crate::state::RoomSnapshot> {
        Arc::new(RoomState::new().snapshot(&room_id("r"), None))
    }

    fn joined() -> ClientEvent {
        ClientEvent::MemberJoined {
            room: snapshot(),
            member_id: user_id("a"),
            was_invited: false,
        }
    }

    fn left() -> ClientEvent {
        ClientEvent::MemberLeft {
            room: snapshot(),
            member_id: user_id("a"),
        }
    }

    fn typing() -> ClientEvent {
        ClientEvent::Ephemeral {
            room: snapshot(),
            event: EphemeralEvent {
                event_type: "m.typing".to_string(),
                content: serde_json::json!({"user_ids": []}),
            },
        }
    }

    #[tokio::test]
    async fn test_typed_and_wildcard_matching() {
        let bus = EventBus::new(4, 8);
        let typed_calls = Arc::new(AtomicUsize::new(0));
        let all_calls = Arc::new(AtomicUsize::new(0));

        let counter = typed_calls.clone();
        bus.subscribe_fn(ClientEventType::MemberLeft, move |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
        let counter = all_calls.clone();
        bus.subscribe_all_fn(move |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
        assert_eq!(bus.handler_count(), 2);

        bus.dispatch(joined()).await;
        bus.dispatch(left()).await;

        assert!(wait_until(|| all_calls.load(Ordering::SeqCst) == 2).await);
        assert!(wait_until(|| typed_calls.load(Ordering::SeqCst) == 1).await);
        assert_eq!(bus.stats().invocations, 3);
    }

    #[tokio::test]
    async fn test_insignificant_event_dropped_when_saturated() {
        let bus = Arc::new(EventBus::new(1, 8));
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());

        let (counter, blocker) = (calls.clone(), gate.clone());
        bus.subscribe_all_fn(move |event| {
            let counter = counter.clone();
            let blocker = blocker.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                if event.event_type() == ClientEventType::MemberJoined {
                    blocker.notified().await;
                }
                Ok(())
            }
        });

        // 占满唯一的槽位
        bus.dispatch(joined()).await;
        assert_eq!(bus.available_slots(), 0);

        bus.dispatch(typing()).await;
        assert_eq!(bus.stats().dropped, 1);

        // 重要事件阻塞直到槽位释放
        let pending = {
            let bus = bus.clone();
            tokio::spawn(async move { bus.dispatch(left()).await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!pending.is_finished());

        gate.notify_one();
        pending.await.unwrap();

        assert!(wait_until(|| calls.load(Ordering::SeqCst) == 2).await);
        assert_eq!(bus.stats().invocations, 2);
    }

    #[tokio::test]
    async fn test_insignificant_event_dispatched_when_idle() {
        let bus = EventBus::new(2, 8);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        bus.subscribe_fn(ClientEventType::Ephemeral, move |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        bus.dispatch(typing()).await;
        assert!(wait_until(|| calls.load(Ordering::SeqCst) == 1).await);
        assert_eq!(bus.stats().dropped, 0);
    }

    #[tokio::test]
    async fn test_handler_failures_are_isolated() {
        let bus = EventBus::new(4, 8);
        let calls = Arc::new(AtomicUsize::new(0));

        bus.subscribe_all_fn(|_| async { Err(SdkError::Handler("boom".to_string())) });
        bus.subscribe_all_fn(|event: ClientEvent| async move {
            if !event.is_insignificant() {
                panic!("handler exploded");
            }
            Ok(())
        });
        let counter = calls.clone();
        bus.subscribe_all_fn(move |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        bus.dispatch(joined()).await;
        bus.dispatch(left()).await;

        assert!(wait_until(|| calls.load(Ordering::SeqCst) == 2).await);
        assert!(wait_until(|| bus.stats().failed == 4).await);
        assert_eq!(bus.available_slots(), 4);
    }

    #[tokio::test]
    async fn test_unsubscribe() {
        let bus = EventBus::default();
        let id = bus.subscribe_all_fn(|_| async { Ok(()) });
        bus.subscribe_fn(ClientEventType::MessageReceived, |_| async { Ok(()) });
        assert_eq!(bus.handler_count(), 2);

        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        assert_eq!(bus.handler_count(), 1);
    }

    #[tokio::test]
    async fn test_run_loop_dispatches_in_order() {
        let bus = Arc::new(EventBus::new(1, 8));
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = seen.clone();
        bus.subscribe_all_fn(move |event| {
            let sink = sink.clone();
            async move {
                sink.lock().push(event.event_type());
                Ok(())
            }
        });

        let shutdown = CancellationToken::new();
        let runner = {
            let bus = bus.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { bus.run(shutdown).await })
        };

        bus.publish(joined()).await.unwrap();
        bus.publish(left()).await.unwrap();

        assert!(wait_until(|| seen.lock().len() == 2).await);
        assert_eq!(
            *seen.lock(),
            vec![ClientEventType::MemberJoined, ClientEventType::MemberLeft]
        );

        shutdown.cancel();
        runner.await.unwrap().unwrap();
        assert_eq!(bus.stats().published, 2);
    }
}
