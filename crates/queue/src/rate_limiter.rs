use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use feedq_core::{
    config::RateLimitConfig,
    models::{ActionType, DailyUsage, RateLimitRecord, RateLimitStatus},
    traits::RateLimitRepository,
    QueueError, QueueResult,
};
use metrics::counter;
use tracing::{debug, info, warn};

/// 按 (实体, 动作类型) 的日/小时双窗口限流器
///
/// 记录在第一次检查或记录时按默认额度创建；窗口到期与封禁过期都在访问时惰性处理。
/// 检查与记录是两次独立操作，并发时可能短暂超出额度。
pub struct RateLimiter {
    repository: Arc<dyn RateLimitRepository>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(repository: Arc<dyn RateLimitRepository>) -> Self {
        Self {
            repository,
            config: RateLimitConfig::default(),
        }
    }

    pub fn with_config(mut self, config: RateLimitConfig) -> Self {
        self.config = config;
        self
    }

    /// 读取记录，必要时创建并刷新到期窗口
    async fn load(
        &self,
        entity_id: &str,
        action_type: ActionType,
        now: DateTime<Utc>,
    ) -> QueueResult<RateLimitRecord> {
        let existing = self.repository.get(entity_id, action_type).await?;
        self.prepare(entity_id, action_type, existing, now).await
    }

    /// 一次读出实体的全部记录，再逐个补齐缺失的动作类型
    async fn load_all(
        &self,
        entity_id: &str,
        now: DateTime<Utc>,
    ) -> QueueResult<Vec<RateLimitRecord>> {
        let mut existing: BTreeMap<ActionType, RateLimitRecord> = self
            .repository
            .list_for_entity(entity_id)
            .await?
            .into_iter()
            .map(|record| (record.action_type, record))
            .collect();

        let mut records = Vec::with_capacity(ActionType::ALL.len());
        for action_type in ActionType::ALL {
            let record = existing.remove(&action_type);
            records.push(self.prepare(entity_id, action_type, record, now).await?);
        }
        Ok(records)
    }

    async fn prepare(
        &self,
        entity_id: &str,
        action_type: ActionType,
        existing: Option<RateLimitRecord>,
        now: DateTime<Utc>,
    ) -> QueueResult<RateLimitRecord> {
        let record = match existing {
            Some(record) => record,
            None => {
                let limits = self.config.limits_for(action_type);
                let mut record = RateLimitRecord::with_defaults(entity_id, action_type, now);
                record.daily_limit = limits.daily;
                record.hourly_limit = limits.hourly;

                self.repository.insert_if_absent(&record).await?;
                self.repository
                    .get(entity_id, action_type)
                    .await?
                    .ok_or_else(|| missing_record(entity_id, action_type))?
            }
        };

        let mut probe = record.clone();
        if !probe.refresh(now) {
            return Ok(record);
        }

        debug!(entity_id, action = %action_type, "Refreshing rate limit windows");
        self.repository
            .refresh(entity_id, action_type, now)
            .await?
            .ok_or_else(|| missing_record(entity_id, action_type))
    }

    pub async fn check_limit(
        &self,
        entity_id: &str,
        action_type: ActionType,
    ) -> QueueResult<RateLimitStatus> {
        self.check_limit_at(entity_id, action_type, Utc::now()).await
    }

    pub async fn check_limit_at(
        &self,
        entity_id: &str,
        action_type: ActionType,
        now: DateTime<Utc>,
    ) -> QueueResult<RateLimitStatus> {
        let record = self.load(entity_id, action_type, now).await?;
        let status = record.status(now);

        if !status.allowed {
            debug!(
                entity_id,
                action = %action_type,
                reason = %status.denial_reason(),
                retry_at = ?status.retry_at(),
                "Rate limit check denied"
            );
        }
        Ok(status)
    }

    pub async fn record_action(
        &self,
        entity_id: &str,
        action_type: ActionType,
    ) -> QueueResult<RateLimitStatus> {
        self.record_action_at(entity_id, action_type, Utc::now()).await
    }

    /// 计数加一；某个窗口用尽时封禁到该窗口重置（两个都用尽时取较晚者）
    pub async fn record_action_at(
        &self,
        entity_id: &str,
        action_type: ActionType,
        now: DateTime<Utc>,
    ) -> QueueResult<RateLimitStatus> {
        self.load(entity_id, action_type, now).await?;

        let mut record = self
            .repository
            .increment(entity_id, action_type, now)
            .await?
            .ok_or_else(|| missing_record(entity_id, action_type))?;

        if let Some((until, reason)) = record.exhaustion_block() {
            let extends_block = record.blocked_until.is_none_or(|current| current < until);
            if extends_block {
                self.repository
                    .set_block(entity_id, action_type, Some(until), Some(&reason), now)
                    .await?;
                record.blocked_until = Some(until);
                record.block_reason = Some(reason);

                counter!("feedq_rate_limit_blocks_total", "action" => action_type.as_str())
                    .increment(1);
                warn!(
                    entity_id,
                    action = %action_type,
                    blocked_until = %until,
                    "Rate limit reached"
                );
            }
        }

        Ok(record.status(now))
    }

    /// 所有动作类型的当前状态
    pub async fn get_all_limits(
        &self,
        entity_id: &str,
    ) -> QueueResult<Vec<(ActionType, RateLimitStatus)>> {
        let now = Utc::now();
        Ok(self
            .load_all(entity_id, now)
            .await?
            .into_iter()
            .map(|record| (record.action_type, record.status(now)))
            .collect())
    }

    pub async fn get_daily_usage(
        &self,
        entity_id: &str,
    ) -> QueueResult<BTreeMap<ActionType, DailyUsage>> {
        let now = Utc::now();
        Ok(self
            .load_all(entity_id, now)
            .await?
            .iter()
            .map(|record| (record.action_type, DailyUsage::from(record)))
            .collect())
    }

    /// 设置自定义额度，之后不再回落到默认值
    pub async fn set_custom_limits(
        &self,
        entity_id: &str,
        action_type: ActionType,
        daily_limit: i32,
        hourly_limit: i32,
    ) -> QueueResult<()> {
        if daily_limit < 0 || hourly_limit < 0 {
            return Err(QueueError::validation("限流额度不能为负数"));
        }

        let now = Utc::now();
        self.load(entity_id, action_type, now).await?;
        self.repository
            .set_limits(entity_id, action_type, daily_limit, hourly_limit, now)
            .await?;

        info!(
            entity_id,
            action = %action_type,
            daily_limit,
            hourly_limit,
            "Custom rate limits set"
        );
        Ok(())
    }

    pub async fn clear_block(&self, entity_id: &str, action_type: ActionType) -> QueueResult<bool> {
        let cleared = self
            .repository
            .set_block(entity_id, action_type, None, None, Utc::now())
            .await?;
        if cleared {
            info!(entity_id, action = %action_type, "Rate limit block cleared");
        }
        Ok(cleared)
    }

    /// 清零两个窗口的计数并解除封禁
    pub async fn reset_counters(
        &self,
        entity_id: &str,
        action_type: ActionType,
    ) -> QueueResult<bool> {
        let reset = self
            .repository
            .reset_counters(entity_id, action_type, Utc::now())
            .await?;
        if reset {
            info!(entity_id, action = %action_type, "Rate limit counters reset");
        }
        Ok(reset)
    }
}

fn missing_record(entity_id: &str, action_type: ActionType) -> QueueError {
    QueueError::Internal(format!("限流记录不存在: {entity_id} / {action_type}"))
}
