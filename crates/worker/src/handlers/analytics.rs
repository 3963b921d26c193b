use std::sync::Arc;

use feedq_core::{
    models::{ActionType, FetchAnalyticsPayload},
    traits::SocialApi,
};
use feedq_queue::RateLimiter;
use tracing::info;

use super::{check_rate_limit, record_action, require_credential};
use crate::processor::HandlerOutcome;

/// 拉取账号洞察数据，计入 `api_call` 额度
pub struct AnalyticsHandler {
    api: Arc<dyn SocialApi>,
    rate_limiter: Arc<RateLimiter>,
}

impl AnalyticsHandler {
    pub fn new(api: Arc<dyn SocialApi>, rate_limiter: Arc<RateLimiter>) -> Self {
        Self { api, rate_limiter }
    }

    pub async fn handle(&self, payload: &FetchAnalyticsPayload) -> HandlerOutcome {
        match self.fetch(payload).await {
            Ok(outcome) | Err(outcome) => outcome,
        }
    }

    async fn fetch(&self, payload: &FetchAnalyticsPayload) -> Result<HandlerOutcome, HandlerOutcome> {
        let token = payload.access_token.as_deref().unwrap_or_default();
        let account_id = payload.external_account_id.as_deref().unwrap_or_default();
        require_credential("access_token", token)?;
        require_credential("external_account_id", account_id)?;
        check_rate_limit(&self.rate_limiter, &payload.entity_id, ActionType::ApiCall).await?;

        let insights = self
            .api
            .fetch_insights(account_id, token)
            .await
            .map_err(|e| HandlerOutcome::failure(e.to_string()))?;

        record_action(&self.rate_limiter, &payload.entity_id, ActionType::ApiCall).await;
        info!(entity_id = %payload.entity_id, "Analytics fetched");
        Ok(HandlerOutcome::success(insights))
    }
}
