//! Matrix 客户端
//!
//! 组合同步循环与事件分发循环：
//! - `run()`：whoami -> 初始同步（只建立基线）-> 并发运行同步循环和分发循环
//! - 长轮询超时立即重试，传输错误按指数退避重试，不设上限
//! - `shutdown()` 通过 CancellationToken 停止两个循环

use std::future::Future;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ClientConfig;
use crate::error::{Result, SdkError};
use crate::event_bus::{EventBus, EventHandler, SubscriptionId};
use crate::events::{ClientEvent, ClientEventType};
use crate::identifier::Identifier;
use crate::state::{GlobalState, RoomSnapshot};
use crate::sync::{SyncBackoff, SyncCoordinator, SyncState, SyncStatus};
use crate::transport::MatrixTransport;
use crate::types::SyncBatch;
use crate::version;

/// Matrix 同步客户端
pub struct MatrixClient {
    config: ClientConfig,
    transport: Arc<dyn MatrixTransport>,
    state: Arc<GlobalState>,
    coordinator: SyncCoordinator,
    event_bus: Arc<EventBus>,
    user_id: RwLock<Option<Identifier>>,
    status: RwLock<SyncStatus>,
    backoff: Mutex<SyncBackoff>,
    shutdown: CancellationToken,
}

impl MatrixClient {
    pub fn new(transport: Arc<dyn MatrixTransport>, config: ClientConfig) -> Result<Self> {
        config.validate()?;

        let state = Arc::new(GlobalState::new(config.recent_event_capacity));
        let coordinator = SyncCoordinator::new(state.clone(), transport.clone(), config.backfill_page_size);
        let event_bus = Arc::new(EventBus::new(config.dispatch_concurrency, config.event_queue_capacity));
        let backoff = SyncBackoff::new(config.retry.clone());

        Ok(Self {
            config,
            transport,
            state,
            coordinator,
            event_bus,
            user_id: RwLock::new(None),
            status: RwLock::new(SyncStatus::default()),
            backoff: Mutex::new(backoff),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// 当前登录用户（`run()` 或 `login()` 之后可用）
    pub fn user_id(&self) -> Option<Identifier> {
        self.user_id.read().clone()
    }

    pub fn state(&self) -> &Arc<GlobalState> {
        &self.state
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    pub fn sync_status(&self) -> SyncStatus {
        self.status.read().clone()
    }

    pub async fn get_room(&self, room_id: &Identifier) -> Option<Arc<RoomSnapshot>> {
        self.state.get_room(room_id).await
    }

    pub async fn find_room_by_name(&self, name: &str) -> Option<Arc<RoomSnapshot>> {
        self.state.find_room_by_name(name).await
    }

    // ========== 订阅 ==========

    pub fn subscribe(&self, event_type: ClientEventType, handler: Arc<dyn EventHandler>) -> SubscriptionId {
        self.event_bus.subscribe(event_type, handler)
    }

    pub fn subscribe_all(&self, handler: Arc<dyn EventHandler>) -> SubscriptionId {
        self.event_bus.subscribe_all(handler)
    }

    pub fn subscribe_fn<F, Fut>(&self, event_type: ClientEventType, handler: F) -> SubscriptionId
    where
        F: Fn(ClientEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.event_bus.subscribe_fn(event_type, handler)
    }

    pub fn subscribe_all_fn<F, Fut>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(ClientEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.event_bus.subscribe_all_fn(handler)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.event_bus.unsubscribe(id)
    }

    // ========== 生命周期 ==========

    /// 查询当前用户
    pub async fn login(&self) -> Result<Identifier> {
        let me = self.transport.whoami().await?;
        info!("当前用户: user_id={}", me);
        *self.user_id.write() = Some(me.clone());
        Ok(me)
    }

    /// 初始同步：不设客户端超时，结果只用于建立基线
    pub async fn initial_sync(&self) -> Result<()> {
        self.set_state(SyncState::Syncing);
        let filter = self.config.sync_filter();
        let batch = self.transport.sync(None, None, &filter).await?;
        self.coordinator.process(batch, true).await?;
        self.mark_synced().await;
        Ok(())
    }

    /// 单次非初始同步，返回发布的事件数
    ///
    /// 没有运行分发循环时，事件数超过队列容量会阻塞。
    pub async fn sync_once(&self) -> Result<usize> {
        let batch = self.fetch_batch().await?;
        let events = self.coordinator.process(batch, false).await?;
        let count = events.len();
        self.publish_all(events).await?;
        self.mark_synced().await;
        Ok(count)
    }

    /// 运行直到 `shutdown()`
    pub async fn run(&self) -> Result<()> {
        info!(
            "MatrixClient 启动: version={}, git_sha={}, build_time={}",
            version::SDK_VERSION,
            version::GIT_SHA,
            version::BUILD_TIME
        );

        if self.user_id().is_none() {
            self.login().await?;
        }

        if !self.initial_sync_until_ready().await {
            self.set_state(SyncState::Stopped);
            return Ok(());
        }

        let (_, dispatch_result) = tokio::join!(self.sync_loop(), self.event_bus.run(self.shutdown.clone()));

        self.set_state(SyncState::Stopped);
        info!("MatrixClient 已停止");
        dispatch_result
    }

    /// 请求停止同步循环和分发循环
    pub fn shutdown(&self) {
        info!("MatrixClient 收到关闭请求");
        self.shutdown.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    // ========== 内部 ==========

    /// 初始同步，失败按退避重试；被关闭时返回 false
    async fn initial_sync_until_ready(&self) -> bool {
        loop {
            let result = tokio::select! {
                _ = self.shutdown.cancelled() => return false,
                result = self.initial_sync() => result,
            };

            match result {
                Ok(()) => return true,
                Err(e) => {
                    if !self.wait_after_failure(&e).await {
                        return false;
                    }
                }
            }
        }
    }

    async fn sync_loop(&self) {
        info!("同步循环启动");

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            // 只有网络请求可以被取消；批次一旦到手就完整处理
            let fetched = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                fetched = self.fetch_batch() => fetched,
            };

            let result = match fetched {
                Ok(batch) => self.apply_batch(batch).await,
                Err(e) => Err(e),
            };

            match result {
                Ok(count) => debug!("同步完成: events={}", count),
                Err(SdkError::Timeout(reason)) => {
                    warn!("长轮询超时，立即重试: {}", reason);
                }
                Err(e) if !e.is_retryable() => {
                    info!("同步循环停止: {}", e);
                    break;
                }
                Err(e) => {
                    if !self.wait_after_failure(&e).await {
                        break;
                    }
                }
            }
        }

        info!("同步循环退出");
    }

    async fn fetch_batch(&self) -> Result<SyncBatch> {
        self.set_state(SyncState::Syncing);
        let since = self.state.next_batch().await;
        let filter = self.config.sync_filter();
        let timeout = self.config.client_timeout();

        debug!("发起长轮询: since={:?}", since);
        let request = self
            .transport
            .sync(since.as_deref(), Some(self.config.server_timeout_ms), &filter);

        match tokio::time::timeout(timeout, request).await {
            Ok(result) => result,
            Err(_) => Err(SdkError::Timeout(format!("sync exceeded {}ms", timeout.as_millis()))),
        }
    }

    async fn apply_batch(&self, batch: SyncBatch) -> Result<usize> {
        let events = self.coordinator.process(batch, false).await?;
        let count = events.len();

        tokio::select! {
            _ = self.shutdown.cancelled() => {
                debug!("关闭中，丢弃未发布的事件");
            }
            published = self.publish_all(events) => published?,
        }

        self.mark_synced().await;
        Ok(count)
    }

    async fn publish_all(&self, events: Vec<ClientEvent>) -> Result<()> {
        for event in events {
            self.event_bus.publish(event).await?;
        }
        Ok(())
    }

    async fn mark_synced(&self) {
        let next_batch = self.state.next_batch().await;
        self.backoff.lock().reset();

        let mut status = self.status.write();
        status.state = SyncState::Synced;
        status.next_batch = next_batch;
        status.consecutive_failures = 0;
        status.last_sync_at = Some(chrono::Utc::now().timestamp_millis());
    }

    /// 记录失败并等待退避；被关闭时返回 false
    async fn wait_after_failure(&self, e: &SdkError) -> bool {
        let (delay, failures) = {
            let mut backoff = self.backoff.lock();
            let delay = backoff.next_delay();
            (delay, backoff.failures())
        };

        error!(
            "同步失败，{}ms 后重试: failures={}, error={}",
            delay.as_millis(),
            failures,
            e
        );
        {
            let mut status = self.status.write();
            status.state = SyncState::Failed { error: e.to_string() };
            status.consecutive_failures = failures;
        }

        tokio::select! {
            _ = self.shutdown.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    fn set_state(&self, state: SyncState) {
        self.status.write().state = state;
    }
}
