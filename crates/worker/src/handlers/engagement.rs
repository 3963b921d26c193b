use std::sync::Arc;

use feedq_core::{
    models::{EngagementKind, EngagementPayload},
    traits::SocialApi,
};
use feedq_queue::RateLimiter;
use tracing::info;

use super::{check_rate_limit, record_action, require_credential};
use crate::processor::HandlerOutcome;

/// 点赞、评论与关注
pub struct EngagementHandler {
    api: Arc<dyn SocialApi>,
    rate_limiter: Arc<RateLimiter>,
}

impl EngagementHandler {
    pub fn new(api: Arc<dyn SocialApi>, rate_limiter: Arc<RateLimiter>) -> Self {
        Self { api, rate_limiter }
    }

    pub async fn handle(&self, payload: &EngagementPayload) -> HandlerOutcome {
        match self.engage(payload).await {
            Ok(outcome) | Err(outcome) => outcome,
        }
    }

    async fn engage(&self, payload: &EngagementPayload) -> Result<HandlerOutcome, HandlerOutcome> {
        require_credential("access_token", &payload.access_token)?;
        let action_type = payload.action_kind.action_type();
        check_rate_limit(&self.rate_limiter, &payload.entity_id, action_type).await?;

        let token = &payload.access_token;
        let result = match payload.action_kind {
            EngagementKind::Like => self.api.like(&payload.target_id, token).await,
            EngagementKind::Follow => self.api.follow(&payload.target_id, token).await,
            EngagementKind::Comment => {
                let text = payload
                    .comment_text
                    .as_deref()
                    .filter(|text| !text.trim().is_empty())
                    .ok_or_else(|| HandlerOutcome::failure("missing comment_text"))?;
                self.api.comment(&payload.target_id, text, token).await
            }
        };
        let data = result.map_err(|e| HandlerOutcome::failure(e.to_string()))?;

        record_action(&self.rate_limiter, &payload.entity_id, action_type).await;
        info!(
            entity_id = %payload.entity_id,
            rule_id = %payload.rule_id,
            target_id = %payload.target_id,
            action = %action_type,
            "Engagement action performed"
        );
        Ok(HandlerOutcome::success(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::testing::{open_limiter, FakeApi};
    use feedq_core::{models::ActionType, traits::ApiError};
    use serde_json::json;

    fn payload(action_kind: EngagementKind, comment_text: Option<&str>) -> EngagementPayload {
        EngagementPayload {
            entity_id: "feed-1".to_string(),
            rule_id: "rule-1".to_string(),
            target_id: "media-9".to_string(),
            access_token: "token".to_string(),
            action_kind,
            comment_text: comment_text.map(String::from),
        }
    }

    #[tokio::test]
    async fn test_kinds_map_to_api_calls_and_counters() {
        let (_dir, _db, limiter) = open_limiter().await;
        let api = Arc::new(FakeApi::default());
        let handler = EngagementHandler::new(api.clone(), limiter.clone());

        assert_eq!(
            handler.handle(&payload(EngagementKind::Like, None)).await,
            HandlerOutcome::success(json!({"success": true}))
        );
        assert!(matches!(
            handler
                .handle(&payload(EngagementKind::Comment, Some("nice")))
                .await,
            HandlerOutcome::Success { .. }
        ));
        assert!(matches!(
            handler.handle(&payload(EngagementKind::Follow, None)).await,
            HandlerOutcome::Success { .. }
        ));

        assert_eq!(
            api.calls(),
            vec!["like:media-9", "comment:media-9:nice", "follow:media-9"]
        );
        let usage = limiter.get_daily_usage("feed-1").await.unwrap();
        assert_eq!(usage[&ActionType::Like].used, 1);
        assert_eq!(usage[&ActionType::Comment].used, 1);
        assert_eq!(usage[&ActionType::Follow].used, 1);
    }

    #[tokio::test]
    async fn test_remote_message_is_verbatim() {
        let (_dir, _db, limiter) = open_limiter().await;
        let api = Arc::new(FakeApi::new().fail_all(ApiError::Remote {
            message: "Media ID is not available".to_string(),
            code: Some(100),
        }));
        let handler = EngagementHandler::new(api, limiter.clone());

        let outcome = handler.handle(&payload(EngagementKind::Like, None)).await;
        assert_eq!(outcome, HandlerOutcome::failure("Media ID is not available"));

        let usage = limiter.get_daily_usage("feed-1").await.unwrap();
        assert_eq!(usage[&ActionType::Like].used, 0);
    }

    #[tokio::test]
    async fn test_blocked_action_is_rate_limited() {
        let (_dir, _db, limiter) = open_limiter().await;
        limiter
            .set_custom_limits("feed-1", ActionType::Follow, 10, 1)
            .await
            .unwrap();
        let api = Arc::new(FakeApi::default());
        let handler = EngagementHandler::new(api.clone(), limiter);

        assert!(matches!(
            handler.handle(&payload(EngagementKind::Follow, None)).await,
            HandlerOutcome::Success { .. }
        ));
        let outcome = handler.handle(&payload(EngagementKind::Follow, None)).await;
        match outcome {
            HandlerOutcome::RateLimited { until, .. } => assert!(until > chrono::Utc::now()),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(api.calls().len(), 1);
    }
}
