use chrono::{DateTime, Duration, Utc};
use feedq_core::config::{RetryConfig, RetryStrategy};

/// 失败任务的重试退避策略
#[derive(Debug, Clone, PartialEq)]
pub enum RetryPolicy {
    /// `delay × attempts`
    Linear { delay: Duration },
    /// `base × multiplier^(attempts-1)`，不超过 `max`，并叠加 ±`jitter` 比例的随机抖动
    Exponential {
        base: Duration,
        max: Duration,
        multiplier: f64,
        jitter: f64,
    },
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::Linear {
            delay: Duration::seconds(60),
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        let base = Duration::seconds(config.base_delay_seconds as i64);
        match config.strategy {
            RetryStrategy::Linear => RetryPolicy::Linear { delay: base },
            RetryStrategy::Exponential => RetryPolicy::Exponential {
                base,
                max: Duration::seconds(config.max_delay_seconds as i64),
                multiplier: config.backoff_multiplier,
                jitter: config.jitter_factor,
            },
        }
    }
}

impl RetryPolicy {
    /// 第 `attempts` 次失败后的等待时间，至少一秒
    pub fn delay(&self, attempts: i32) -> Duration {
        let attempts = attempts.max(1);
        let delay = match self {
            RetryPolicy::Linear { delay } => *delay * attempts,
            RetryPolicy::Exponential {
                base,
                max,
                multiplier,
                jitter,
            } => {
                let base_ms = base.num_milliseconds() as f64;
                let max_ms = max.num_milliseconds() as f64;

                let exponential = base_ms * multiplier.powi(attempts - 1);
                let capped = exponential.min(max_ms);

                // 避免大量任务在同一时刻重试
                let offset = capped * jitter * (rand::random::<f64>() - 0.5) * 2.0;
                let final_ms = (capped + offset).clamp(base_ms, max_ms.max(base_ms));
                Duration::milliseconds(final_ms as i64)
            }
        };
        delay.max(Duration::seconds(1))
    }

    pub fn next_run(&self, attempts: i32, now: DateTime<Utc>) -> DateTime<Utc> {
        now + self.delay(attempts)
    }
}
