//! 客户端配置

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{Result, SdkError};

/// 客户端配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// 长轮询服务器端超时（毫秒）
    pub server_timeout_ms: u64,
    /// 客户端超时 = 服务器端超时 + 该宽限（毫秒）
    pub client_timeout_grace_ms: u64,
    /// 每个房间时间线最多返回的事件数
    pub timeline_limit: u32,
    /// 间隙补齐时每页拉取的事件数
    pub backfill_page_size: usize,
    /// 最近事件缓存容量
    pub recent_event_capacity: usize,
    /// 处理器最大并发数
    pub dispatch_concurrency: usize,
    /// 事件队列容量
    pub event_queue_capacity: usize,
    /// 是否请求临时事件（typing、回执）
    pub include_ephemeral: bool,
    /// 同步失败重试配置
    pub retry: SyncRetryConfig,
}

/// 同步重试配置（传输错误时的指数退避）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRetryConfig {
    /// 基础延迟（毫秒）
    pub base_delay_ms: u64,
    /// 最大延迟（毫秒）
    pub max_delay_ms: u64,
    /// 指数退避因子
    pub backoff_factor: f64,
    /// 随机抖动因子 (0.0-1.0)
    pub jitter_factor: f64,
}

impl Default for SyncRetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            backoff_factor: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_timeout_ms: 30_000,
            client_timeout_grace_ms: 1_000,
            timeline_limit: 50,
            backfill_page_size: 50,
            recent_event_capacity: 1000,
            dispatch_concurrency: 64,
            event_queue_capacity: 100,
            include_ephemeral: false,
            retry: SyncRetryConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::new()
    }

    /// 客户端侧长轮询上限
    pub fn client_timeout(&self) -> Duration {
        Duration::from_millis(self.server_timeout_ms + self.client_timeout_grace_ms)
    }

    /// 校验配置
    pub fn validate(&self) -> Result<()> {
        if self.backfill_page_size == 0 {
            return Err(SdkError::Config("backfill_page_size must be positive".to_string()));
        }
        if self.dispatch_concurrency == 0 {
            return Err(SdkError::Config("dispatch_concurrency must be positive".to_string()));
        }
        if self.event_queue_capacity == 0 {
            return Err(SdkError::Config("event_queue_capacity must be positive".to_string()));
        }
        if self.recent_event_capacity == 0 {
            return Err(SdkError::Config("recent_event_capacity must be positive".to_string()));
        }
        if self.timeline_limit == 0 {
            return Err(SdkError::Config("timeline_limit must be positive".to_string()));
        }
        if !(0.0..=1.0).contains(&self.retry.jitter_factor) {
            return Err(SdkError::Config("jitter_factor must be within 0.0..=1.0".to_string()));
        }
        if self.retry.backoff_factor < 1.0 {
            return Err(SdkError::Config("backoff_factor must be at least 1.0".to_string()));
        }
        Ok(())
    }

    /// `/sync` 使用的过滤器 JSON
    pub fn sync_filter(&self) -> String {
        let ephemeral_limit = if self.include_ephemeral { 100 } else { 0 };
        json!({
            "presence": {"limit": 0},
            "account_data": {"limit": 0},
            "room": {
                "timeline": {"limit": self.timeline_limit},
                "ephemeral": {"limit": ephemeral_limit},
                "account_data": {"limit": 0},
            }
        })
        .to_string()
    }
}

/// 配置构建器
#[derive(Debug, Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn server_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.config.server_timeout_ms = timeout_ms;
        self
    }

    pub fn client_timeout_grace_ms(mut self, grace_ms: u64) -> Self {
        self.config.client_timeout_grace_ms = grace_ms;
        self
    }

    pub fn timeline_limit(mut self, limit: u32) -> Self {
        self.config.timeline_limit = limit;
        self
    }

    pub fn backfill_page_size(mut self, page_size: usize) -> Self {
        self.config.backfill_page_size = page_size;
        self
    }

    pub fn recent_event_capacity(mut self, capacity: usize) -> Self {
        self.config.recent_event_capacity = capacity;
        self
    }

    pub fn dispatch_concurrency(mut self, concurrency: usize) -> Self {
        self.config.dispatch_concurrency = concurrency;
        self
    }

    pub fn event_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.event_queue_capacity = capacity;
        self
    }

    pub fn include_ephemeral(mut self, include: bool) -> Self {
        self.config.include_ephemeral = include;
        self
    }

    pub fn retry(mut self, retry: SyncRetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    /// 构建并校验
    pub fn build(self) -> Result<ClientConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
