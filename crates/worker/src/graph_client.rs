use std::time::Duration;

use async_trait::async_trait;
use feedq_core::{
    config::ApiConfig,
    models::MediaType,
    traits::{ApiError, ContainerRequest, ContainerStatus, SocialApi},
};
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

/// 基于 reqwest 的 Graph 风格 HTTP 客户端
pub struct GraphApiClient {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct IdResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status_code: String,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: RemoteError,
}

#[derive(Debug, Deserialize)]
struct RemoteError {
    message: String,
    #[serde(default)]
    code: Option<i64>,
}

impl GraphApiClient {
    pub fn new(config: &ApiConfig) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(|e| ApiError::Transport(format!("创建HTTP客户端失败: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// 发送请求；非 2xx 响应优先解析平台的错误结构，保留原始消息
    async fn send(&self, request: RequestBuilder) -> Result<Value, ApiError> {
        let response = request
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(match serde_json::from_str::<ErrorEnvelope>(&body) {
                Ok(envelope) => ApiError::Remote {
                    message: envelope.error.message,
                    code: envelope.error.code,
                },
                Err(_) => ApiError::Remote {
                    message: format!("HTTP {status}: {body}"),
                    code: Some(status.as_u16() as i64),
                },
            });
        }

        serde_json::from_str(&body).map_err(|e| ApiError::InvalidResponse(e.to_string()))
    }

    async fn send_for_id(&self, request: RequestBuilder) -> Result<String, ApiError> {
        let value = self.send(request).await?;
        let parsed: IdResponse =
            serde_json::from_value(value).map_err(|e| ApiError::InvalidResponse(e.to_string()))?;
        Ok(parsed.id)
    }
}

fn container_params(request: &ContainerRequest) -> Vec<(&'static str, String)> {
    let mut params = vec![("access_token", request.access_token.clone())];

    match request.media_type {
        MediaType::Video | MediaType::Reels => {
            params.push(("video_url", request.media_url.clone()));
            let media_type = if request.media_type == MediaType::Reels {
                "REELS"
            } else {
                "VIDEO"
            };
            params.push(("media_type", media_type.to_string()));
        }
        MediaType::Image | MediaType::Carousel => {
            params.push(("image_url", request.media_url.clone()));
        }
    }

    if request.is_carousel_item {
        params.push(("is_carousel_item", "true".to_string()));
    }
    if let Some(caption) = request.caption.as_ref().filter(|c| !c.is_empty()) {
        params.push(("caption", caption.clone()));
    }
    params
}

#[async_trait]
impl SocialApi for GraphApiClient {
    async fn create_container(&self, request: &ContainerRequest) -> Result<String, ApiError> {
        debug!(account_id = %request.account_id, media_type = ?request.media_type, "Creating media container");
        let builder = self
            .client
            .post(self.url(&format!("{}/media", request.account_id)))
            .form(&container_params(request));
        self.send_for_id(builder).await
    }

    async fn create_carousel_container(
        &self,
        account_id: &str,
        access_token: &str,
        children: &[String],
        caption: &str,
    ) -> Result<String, ApiError> {
        let params = [
            ("media_type", "CAROUSEL".to_string()),
            ("children", children.join(",")),
            ("caption", caption.to_string()),
            ("access_token", access_token.to_string()),
        ];
        let builder = self
            .client
            .post(self.url(&format!("{account_id}/media")))
            .form(&params);
        self.send_for_id(builder).await
    }

    async fn container_status(
        &self,
        container_id: &str,
        access_token: &str,
    ) -> Result<ContainerStatus, ApiError> {
        let builder = self
            .client
            .get(self.url(container_id))
            .query(&[("fields", "status_code,status"), ("access_token", access_token)]);
        let value = self.send(builder).await?;
        let parsed: StatusResponse =
            serde_json::from_value(value).map_err(|e| ApiError::InvalidResponse(e.to_string()))?;
        Ok(ContainerStatus::from_code(
            &parsed.status_code,
            parsed.status.as_deref(),
        ))
    }

    async fn publish_container(
        &self,
        account_id: &str,
        container_id: &str,
        access_token: &str,
    ) -> Result<String, ApiError> {
        let builder = self
            .client
            .post(self.url(&format!("{account_id}/media_publish")))
            .form(&[("creation_id", container_id), ("access_token", access_token)]);
        self.send_for_id(builder).await
    }

    async fn like(&self, media_id: &str, access_token: &str) -> Result<Value, ApiError> {
        let builder = self
            .client
            .post(self.url(&format!("{media_id}/likes")))
            .form(&[("access_token", access_token)]);
        self.send(builder).await
    }

    async fn comment(
        &self,
        media_id: &str,
        text: &str,
        access_token: &str,
    ) -> Result<Value, ApiError> {
        let builder = self
            .client
            .post(self.url(&format!("{media_id}/comments")))
            .form(&[("message", text), ("access_token", access_token)]);
        self.send(builder).await
    }

    async fn follow(&self, user_id: &str, access_token: &str) -> Result<Value, ApiError> {
        let builder = self
            .client
            .post(self.url(&format!("{user_id}/follows")))
            .form(&[("access_token", access_token)]);
        self.send(builder).await
    }

    async fn send_message(
        &self,
        recipient_id: &str,
        text: &str,
        access_token: &str,
    ) -> Result<Value, ApiError> {
        let body = serde_json::json!({
            "recipient": { "id": recipient_id },
            "message": { "text": text },
        });
        let builder = self
            .client
            .post(self.url("me/messages"))
            .query(&[("access_token", access_token)])
            .json(&body);
        self.send(builder).await
    }

    async fn fetch_insights(&self, account_id: &str, access_token: &str) -> Result<Value, ApiError> {
        let builder = self.client.get(self.url(account_id)).query(&[
            (
                "fields",
                "followers_count,follows_count,media_count,username",
            ),
            ("access_token", access_token),
        ]);
        self.send(builder).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = GraphApiClient::new(&ApiConfig {
            base_url: "https://graph.example.com/v1/".to_string(),
            ..ApiConfig::default()
        })
        .unwrap();
        assert_eq!(client.url("123/media"), "https://graph.example.com/v1/123/media");
    }

    #[test]
    fn test_container_params_by_media_type() {
        let reels = ContainerRequest::single("acct", "tok", MediaType::Reels, "v.mp4", "hi");
        let params = container_params(&reels);
        assert!(params.contains(&("video_url", "v.mp4".to_string())));
        assert!(params.contains(&("media_type", "REELS".to_string())));
        assert!(params.contains(&("caption", "hi".to_string())));

        let child = ContainerRequest::carousel_item("acct", "tok", "a.jpg");
        let params = container_params(&child);
        assert!(params.contains(&("image_url", "a.jpg".to_string())));
        assert!(params.contains(&("is_carousel_item", "true".to_string())));
        assert!(!params.iter().any(|(key, _)| *key == "caption"));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_transport_error() {
        let client = GraphApiClient::new(&ApiConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            request_timeout_seconds: 2,
            ..ApiConfig::default()
        })
        .unwrap();

        let err = client.like("media-1", "token").await.unwrap_err();
        assert!(matches!(err, ApiError::Transport(_)));
    }
}
