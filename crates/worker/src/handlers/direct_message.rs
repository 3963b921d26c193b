use std::sync::Arc;

use feedq_core::{
    models::{ActionType, DirectMessagePayload},
    traits::SocialApi,
};
use feedq_queue::RateLimiter;
use tracing::info;

use super::{check_rate_limit, record_action, require_credential};
use crate::processor::HandlerOutcome;

pub struct DirectMessageHandler {
    api: Arc<dyn SocialApi>,
    rate_limiter: Arc<RateLimiter>,
}

impl DirectMessageHandler {
    pub fn new(api: Arc<dyn SocialApi>, rate_limiter: Arc<RateLimiter>) -> Self {
        Self { api, rate_limiter }
    }

    pub async fn handle(&self, payload: &DirectMessagePayload) -> HandlerOutcome {
        match self.send(payload).await {
            Ok(outcome) | Err(outcome) => outcome,
        }
    }

    async fn send(&self, payload: &DirectMessagePayload) -> Result<HandlerOutcome, HandlerOutcome> {
        require_credential("access_token", &payload.access_token)?;
        check_rate_limit(
            &self.rate_limiter,
            &payload.entity_id,
            ActionType::DirectMessage,
        )
        .await?;

        let data = self
            .api
            .send_message(
                &payload.target_id,
                &payload.message_text,
                &payload.access_token,
            )
            .await
            .map_err(|e| HandlerOutcome::failure(e.to_string()))?;

        record_action(
            &self.rate_limiter,
            &payload.entity_id,
            ActionType::DirectMessage,
        )
        .await;
        info!(entity_id = %payload.entity_id, target_id = %payload.target_id, "Direct message sent");
        Ok(HandlerOutcome::success(data))
    }
}
