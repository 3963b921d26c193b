//! 任务处理器
//!
//! 每个处理器对应一种负载变体。受限流约束的动作先检查额度，
//! 被拒绝时返回 [`HandlerOutcome::RateLimited`]；外部调用成功后再记录一次动作。

mod analytics;
mod direct_message;
mod engagement;
mod publish;

pub use analytics::AnalyticsHandler;
pub use direct_message::DirectMessageHandler;
pub use engagement::EngagementHandler;
pub use publish::{PublishHandler, PublishSettings};

use chrono::Utc;
use feedq_core::models::ActionType;
use feedq_queue::RateLimiter;
use tracing::{info, warn};

use crate::processor::HandlerOutcome;

/// 额度检查，拒绝时返回应当交给Worker池的结果
pub(crate) async fn check_rate_limit(
    rate_limiter: &RateLimiter,
    entity_id: &str,
    action_type: ActionType,
) -> Result<(), HandlerOutcome> {
    let status = rate_limiter
        .check_limit(entity_id, action_type)
        .await
        .map_err(|e| HandlerOutcome::failure(format!("rate limit check failed: {e}")))?;

    if status.allowed {
        return Ok(());
    }

    let until = status
        .retry_at()
        .unwrap_or_else(|| status.reset_times.hourly.max(Utc::now()));
    let reason = status.denial_reason();
    info!(
        entity_id,
        action = %action_type,
        until = %until,
        reason = %reason,
        "Action rate limited"
    );
    Err(HandlerOutcome::RateLimited { until, reason })
}

/// 外部动作已经生效，记录失败只告警，不影响结果
pub(crate) async fn record_action(
    rate_limiter: &RateLimiter,
    entity_id: &str,
    action_type: ActionType,
) {
    if let Err(e) = rate_limiter.record_action(entity_id, action_type).await {
        warn!(
            entity_id,
            action = %action_type,
            error = %e,
            "Failed to record rate limited action"
        );
    }
}

pub(crate) fn require_credential(name: &str, value: &str) -> Result<(), HandlerOutcome> {
    if value.trim().is_empty() {
        return Err(HandlerOutcome::failure(format!("missing {name}")));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod testing {
    //! 处理器单元测试共用的限流器

    use std::sync::Arc;

    use feedq_core::config::DatabaseConfig;
    use feedq_infrastructure::DatabaseManager;
    use feedq_queue::RateLimiter;
    use tempfile::TempDir;

    pub use crate::testing::FakeApi;

    pub async fn open_limiter() -> (TempDir, DatabaseManager, Arc<RateLimiter>) {
        let dir = tempfile::tempdir().unwrap();
        let config = DatabaseConfig {
            url: format!("sqlite:{}", dir.path().join("handlers.db").display()),
            ..DatabaseConfig::default()
        };
        let db = DatabaseManager::open(&config).await.unwrap();
        let limiter = Arc::new(RateLimiter::new(db.rate_limit_repository()));
        (dir, db, limiter)
    }
}
