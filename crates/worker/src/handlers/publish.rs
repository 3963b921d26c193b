use std::sync::Arc;
use std::time::Duration;

use feedq_core::{
    config::ApiConfig,
    models::{ActionType, MediaType, PublishPostPayload},
    traits::{ContainerRequest, ContainerStatus, SocialApi},
};
use feedq_queue::RateLimiter;
use serde_json::json;
use tokio::time::sleep;
use tracing::{debug, info};

use super::{check_rate_limit, record_action, require_credential};
use crate::processor::HandlerOutcome;

/// 容器状态轮询参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PublishSettings {
    pub poll_interval: Duration,
    pub max_poll_attempts: u32,
}

impl Default for PublishSettings {
    fn default() -> Self {
        Self::from(&ApiConfig::default())
    }
}

impl From<&ApiConfig> for PublishSettings {
    fn from(config: &ApiConfig) -> Self {
        Self {
            poll_interval: Duration::from_millis(config.publish_poll_interval_ms),
            max_poll_attempts: config.publish_max_poll_attempts,
        }
    }
}

/// 内容发布：创建容器 → 轮询处理状态 → 发布
pub struct PublishHandler {
    api: Arc<dyn SocialApi>,
    rate_limiter: Arc<RateLimiter>,
    settings: PublishSettings,
}

impl PublishHandler {
    pub fn new(
        api: Arc<dyn SocialApi>,
        rate_limiter: Arc<RateLimiter>,
        settings: PublishSettings,
    ) -> Self {
        Self {
            api,
            rate_limiter,
            settings,
        }
    }

    pub async fn handle(&self, payload: &PublishPostPayload) -> HandlerOutcome {
        match self.publish(payload).await {
            Ok(outcome) | Err(outcome) => outcome,
        }
    }

    async fn publish(&self, payload: &PublishPostPayload) -> Result<HandlerOutcome, HandlerOutcome> {
        require_credential("access_token", &payload.access_token)?;
        require_credential("external_account_id", &payload.external_account_id)?;
        check_rate_limit(&self.rate_limiter, &payload.entity_id, ActionType::Post).await?;

        let container_id = self.create_container(payload).await?;
        debug!(entity_id = %payload.entity_id, container_id = %container_id, "Media container created");

        self.wait_until_ready(&container_id, &payload.access_token)
            .await?;

        let media_id = self
            .api
            .publish_container(
                &payload.external_account_id,
                &container_id,
                &payload.access_token,
            )
            .await
            .map_err(|e| HandlerOutcome::failure(e.to_string()))?;

        record_action(&self.rate_limiter, &payload.entity_id, ActionType::Post).await;
        info!(
            entity_id = %payload.entity_id,
            scheduled_post_id = ?payload.scheduled_post_id,
            media_id = %media_id,
            "Post published"
        );

        Ok(HandlerOutcome::success(json!({
            "media_id": media_id,
            "container_id": container_id,
        })))
    }

    /// 轮播帖子先为每个媒体创建子容器，再创建父容器
    async fn create_container(&self, payload: &PublishPostPayload) -> Result<String, HandlerOutcome> {
        let account_id = &payload.external_account_id;
        let token = &payload.access_token;

        let created = if payload.media_type == MediaType::Carousel {
            let mut children = Vec::with_capacity(payload.media_urls.len());
            for url in &payload.media_urls {
                let request = ContainerRequest::carousel_item(account_id, token, url);
                let child = self
                    .api
                    .create_container(&request)
                    .await
                    .map_err(|e| HandlerOutcome::failure(e.to_string()))?;
                children.push(child);
            }
            self.api
                .create_carousel_container(account_id, token, &children, &payload.caption)
                .await
        } else {
            let url = payload
                .media_urls
                .first()
                .ok_or_else(|| HandlerOutcome::failure("missing media url"))?;
            let request = ContainerRequest::single(
                account_id,
                token,
                payload.media_type,
                url,
                &payload.caption,
            );
            self.api.create_container(&request).await
        };

        created.map_err(|e| HandlerOutcome::failure(e.to_string()))
    }

    async fn wait_until_ready(
        &self,
        container_id: &str,
        access_token: &str,
    ) -> Result<(), HandlerOutcome> {
        for attempt in 1..=self.settings.max_poll_attempts {
            let status = self
                .api
                .container_status(container_id, access_token)
                .await
                .map_err(|e| HandlerOutcome::failure(e.to_string()))?;

            match status {
                ContainerStatus::Finished | ContainerStatus::Published => return Ok(()),
                ContainerStatus::Error(detail) => {
                    return Err(HandlerOutcome::failure(format!(
                        "media processing failed: {detail}"
                    )))
                }
                ContainerStatus::Expired => {
                    return Err(HandlerOutcome::failure("media container expired"))
                }
                ContainerStatus::InProgress => {
                    debug!(container_id, attempt, "Media container still processing");
                    if attempt < self.settings.max_poll_attempts {
                        sleep(self.settings.poll_interval).await;
                    }
                }
            }
        }

        Err(HandlerOutcome::failure("processing did not finish in time"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::testing::{open_limiter, FakeApi};
    use feedq_core::traits::ApiError;

    fn settings(max_poll_attempts: u32) -> PublishSettings {
        PublishSettings {
            poll_interval: Duration::from_millis(1),
            max_poll_attempts,
        }
    }

    fn payload(media_urls: &[&str], media_type: MediaType) -> PublishPostPayload {
        PublishPostPayload {
            entity_id: "feed-1".to_string(),
            scheduled_post_id: Some("post-1".to_string()),
            caption: "hello".to_string(),
            media_urls: media_urls.iter().map(|u| u.to_string()).collect(),
            media_type,
            access_token: "token".to_string(),
            external_account_id: "acct".to_string(),
        }
    }

    #[tokio::test]
    async fn test_single_media_publish() {
        let (_dir, _db, limiter) = open_limiter().await;
        let api = Arc::new(FakeApi::new().with_statuses(vec![
            ContainerStatus::InProgress,
            ContainerStatus::Finished,
        ]));
        let handler = PublishHandler::new(api.clone(), limiter.clone(), settings(5));

        let outcome = handler.handle(&payload(&["a.jpg"], MediaType::Image)).await;
        assert_eq!(
            outcome,
            HandlerOutcome::success(json!({"media_id": "media-1", "container_id": "c-a.jpg"}))
        );
        assert_eq!(
            api.calls(),
            vec![
                "create:a.jpg",
                "status:c-a.jpg",
                "status:c-a.jpg",
                "publish:c-a.jpg"
            ]
        );

        let usage = limiter.get_daily_usage("feed-1").await.unwrap();
        assert_eq!(usage[&ActionType::Post].used, 1);
    }

    #[tokio::test]
    async fn test_carousel_creates_children_then_parent() {
        let (_dir, _db, limiter) = open_limiter().await;
        let api = Arc::new(FakeApi::default());
        let handler = PublishHandler::new(api.clone(), limiter, settings(1));

        let outcome = handler
            .handle(&payload(&["a.jpg", "b.jpg"], MediaType::Carousel))
            .await;
        assert!(matches!(outcome, HandlerOutcome::Success { .. }));
        assert_eq!(
            api.calls(),
            vec![
                "create:a.jpg",
                "create:b.jpg",
                "carousel:c-a.jpg,c-b.jpg",
                "status:c-parent",
                "publish:c-parent"
            ]
        );
    }

    #[tokio::test]
    async fn test_poll_bound_exceeded() {
        let (_dir, _db, limiter) = open_limiter().await;
        let api = Arc::new(FakeApi::new().with_statuses(vec![ContainerStatus::InProgress; 3]));
        let handler = PublishHandler::new(api.clone(), limiter.clone(), settings(3));

        let outcome = handler.handle(&payload(&["a.jpg"], MediaType::Image)).await;
        assert_eq!(
            outcome,
            HandlerOutcome::failure("processing did not finish in time")
        );
        assert!(!api.calls().iter().any(|c| c.starts_with("publish")));

        let usage = limiter.get_daily_usage("feed-1").await.unwrap();
        assert_eq!(usage[&ActionType::Post].used, 0);
    }

    #[tokio::test]
    async fn test_container_error_stops_polling() {
        let (_dir, _db, limiter) = open_limiter().await;
        let api = Arc::new(FakeApi::new().with_statuses(vec![ContainerStatus::Error(
            "unsupported format".to_string(),
        )]));
        let handler = PublishHandler::new(api.clone(), limiter, settings(10));

        let outcome = handler.handle(&payload(&["a.mov"], MediaType::Video)).await;
        assert_eq!(
            outcome,
            HandlerOutcome::failure("media processing failed: unsupported format")
        );
        assert_eq!(api.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_remote_error_is_surfaced() {
        let (_dir, _db, limiter) = open_limiter().await;
        let api = Arc::new(FakeApi::new().fail_all(ApiError::remote("Invalid OAuth access token")));
        let handler = PublishHandler::new(api, limiter, settings(1));

        let outcome = handler.handle(&payload(&["a.jpg"], MediaType::Image)).await;
        assert_eq!(outcome, HandlerOutcome::failure("Invalid OAuth access token"));
    }

    #[tokio::test]
    async fn test_exhausted_post_quota_defers() {
        let (_dir, _db, limiter) = open_limiter().await;
        limiter
            .set_custom_limits("feed-1", ActionType::Post, 0, 5)
            .await
            .unwrap();
        let api = Arc::new(FakeApi::default());
        let handler = PublishHandler::new(api.clone(), limiter, settings(1));

        let outcome = handler.handle(&payload(&["a.jpg"], MediaType::Image)).await;
        assert!(matches!(outcome, HandlerOutcome::RateLimited { .. }));
        assert!(api.calls().is_empty());
    }
}
