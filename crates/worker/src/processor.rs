use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use feedq_core::{
    config::ApiConfig,
    models::{Job, JobPayload},
    traits::SocialApi,
};
use feedq_queue::RateLimiter;
use serde_json::Value;
use tracing::debug;

use crate::handlers::{
    AnalyticsHandler, DirectMessageHandler, EngagementHandler, PublishHandler, PublishSettings,
};

/// 处理器的执行结果
///
/// 处理器内部的所有错误都转换为这三种结果之一，由Worker池据此写回队列。
#[derive(Debug, Clone, PartialEq)]
pub enum HandlerOutcome {
    Success { data: Value },
    Failure { error: String },
    /// 限流拒绝，任务延后到 `until`，不消耗尝试次数
    RateLimited { until: DateTime<Utc>, reason: String },
}

impl HandlerOutcome {
    pub fn success(data: Value) -> Self {
        HandlerOutcome::Success { data }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        HandlerOutcome::Failure {
            error: error.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            HandlerOutcome::Success { .. } => "success",
            HandlerOutcome::Failure { .. } => "failure",
            HandlerOutcome::RateLimited { .. } => "rate_limited",
        }
    }
}

/// Worker池执行任务的入口
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(&self, job: &Job) -> HandlerOutcome;
}

/// 按负载变体分派到对应处理器
pub struct JobProcessor {
    publish: PublishHandler,
    engagement: EngagementHandler,
    direct_message: DirectMessageHandler,
    analytics: AnalyticsHandler,
}

impl JobProcessor {
    pub fn new(
        api: Arc<dyn SocialApi>,
        rate_limiter: Arc<RateLimiter>,
        publish_settings: PublishSettings,
    ) -> Self {
        Self {
            publish: PublishHandler::new(api.clone(), rate_limiter.clone(), publish_settings),
            engagement: EngagementHandler::new(api.clone(), rate_limiter.clone()),
            direct_message: DirectMessageHandler::new(api.clone(), rate_limiter.clone()),
            analytics: AnalyticsHandler::new(api, rate_limiter),
        }
    }

    pub fn from_config(
        api: Arc<dyn SocialApi>,
        rate_limiter: Arc<RateLimiter>,
        config: &ApiConfig,
    ) -> Self {
        Self::new(api, rate_limiter, PublishSettings::from(config))
    }

    pub async fn process(&self, payload: &JobPayload) -> HandlerOutcome {
        match payload {
            JobPayload::PublishPost(p) => self.publish.handle(p).await,
            JobPayload::EngagementAction(p) => self.engagement.handle(p).await,
            JobPayload::DirectMessage(p) => self.direct_message.handle(p).await,
            JobPayload::FetchAnalytics(p) => self.analytics.handle(p).await,
        }
    }
}

#[async_trait]
impl JobExecutor for JobProcessor {
    async fn execute(&self, job: &Job) -> HandlerOutcome {
        debug!(job_id = %job.id, job_type = %job.job_type, "Dispatching job to handler");
        self.process(&job.payload).await
    }
}
