use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::models::{ActionType, WindowLimits};

/// 重试间隔上限（秒）
pub const MAX_RETRY_DELAY_SECONDS: u64 = 30 * 24 * 3600;
/// 终态任务最长保留天数
pub const MAX_RETENTION_DAYS: i64 = 36500;

/// 重试退避策略
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategy {
    /// delay × attempts
    #[default]
    Linear,
    /// base × multiplier^(attempts-1)，带上限与随机抖动
    Exponential,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    pub strategy: RetryStrategy,
    /// 基础重试间隔（秒）
    pub base_delay_seconds: u64,
    /// 最大重试间隔（秒），仅指数退避使用
    pub max_delay_seconds: u64,
    /// 指数退避倍数
    pub backoff_multiplier: f64,
    /// 重试间隔的随机抖动范围（0.0-1.0）
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            strategy: RetryStrategy::Linear,
            base_delay_seconds: 60,
            max_delay_seconds: 3600,
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl RetryConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.base_delay_seconds == 0 {
            return Err(anyhow::anyhow!("基础重试间隔必须大于0"));
        }
        if self.max_delay_seconds < self.base_delay_seconds {
            return Err(anyhow::anyhow!("最大重试间隔不能小于基础重试间隔"));
        }
        if self.max_delay_seconds > MAX_RETRY_DELAY_SECONDS {
            return Err(anyhow::anyhow!(
                "最大重试间隔不能超过 {}s",
                MAX_RETRY_DELAY_SECONDS
            ));
        }
        if self.backoff_multiplier < 1.0 {
            return Err(anyhow::anyhow!("退避倍数不能小于1.0"));
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(anyhow::anyhow!("抖动系数必须在0.0-1.0之间"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueConfig {
    pub default_max_attempts: i32,
    pub retry: RetryConfig,
    pub cleanup_enabled: bool,
    pub cleanup_interval_seconds: u64,
    /// 终态任务保留天数
    pub retention_days: i64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            default_max_attempts: 3,
            retry: RetryConfig::default(),
            cleanup_enabled: true,
            cleanup_interval_seconds: 3600,
            retention_days: 30,
        }
    }
}

impl QueueConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.default_max_attempts <= 0 {
            return Err(anyhow::anyhow!("最大尝试次数必须大于0"));
        }
        if self.cleanup_enabled && self.cleanup_interval_seconds == 0 {
            return Err(anyhow::anyhow!("清理间隔必须大于0"));
        }
        if self.retention_days <= 0 || self.retention_days > MAX_RETENTION_DAYS {
            return Err(anyhow::anyhow!(
                "保留天数必须在1-{}之间",
                MAX_RETENTION_DAYS
            ));
        }
        self.retry.validate()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RateLimitConfig {
    /// 覆盖各动作类型的默认额度
    #[serde(default)]
    pub overrides: BTreeMap<ActionType, WindowLimits>,
}

impl RateLimitConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        for (action, limits) in &self.overrides {
            if limits.daily < 0 || limits.hourly < 0 {
                return Err(anyhow::anyhow!("{action} 的限流额度不能为负数"));
            }
        }
        Ok(())
    }

    /// 合并覆盖值后的默认额度
    pub fn limits_for(&self, action: ActionType) -> WindowLimits {
        self.overrides
            .get(&action)
            .copied()
            .unwrap_or_else(|| action.default_limits())
    }
}
