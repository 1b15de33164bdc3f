use std::time::Duration;

use crate::config::SyncRetryConfig;

/// 同步循环的退避状态
///
/// 传输失败时按指数退避等待，成功一次后重置。没有重试上限。
#[derive(Debug, Clone)]
pub struct SyncBackoff {
    config: SyncRetryConfig,
    failures: u32,
}

impl SyncBackoff {
    pub fn new(config: SyncRetryConfig) -> Self {
        Self { config, failures: 0 }
    }

    /// 连续失败次数
    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }

    /// 记录一次失败，返回下一次重试前的等待时间
    pub fn next_delay(&mut self) -> Duration {
        // 基础延迟 = base_delay * (backoff_factor ^ failures)
        let base_delay = self.config.base_delay_ms as f64 * self.config.backoff_factor.powf(self.failures as f64);
        let capped_delay = base_delay.min(self.config.max_delay_ms as f64);

        // 添加随机抖动
        let jitter = capped_delay * self.config.jitter_factor * (rand::random::<f64>() - 0.5);
        let final_delay = (capped_delay + jitter).max(0.0);

        self.failures = self.failures.saturating_add(1);
        Duration::from_millis(final_delay as u64)
    }
}
