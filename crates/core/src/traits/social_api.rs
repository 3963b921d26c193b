//! 第三方社交平台接口
//!
//! 发布采用 创建容器 → 轮询状态 → 发布容器 的三步协议；
//! 互动与私信是单次请求。实现只需返回成功负载或远端错误信息。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::MediaType;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ApiError {
    /// 远端返回的错误，消息原样保留
    #[error("{message}")]
    Remote { message: String, code: Option<i64> },

    #[error("请求失败: {0}")]
    Transport(String),

    #[error("无法解析响应: {0}")]
    InvalidResponse(String),
}

impl ApiError {
    pub fn remote(message: impl Into<String>) -> Self {
        ApiError::Remote {
            message: message.into(),
            code: None,
        }
    }
}

/// 媒体容器创建请求
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContainerRequest {
    pub account_id: String,
    pub access_token: String,
    pub media_type: MediaType,
    pub media_url: String,
    pub caption: Option<String>,
    /// 作为轮播子项创建
    pub is_carousel_item: bool,
}

impl ContainerRequest {
    pub fn single(
        account_id: &str,
        access_token: &str,
        media_type: MediaType,
        media_url: &str,
        caption: &str,
    ) -> Self {
        Self {
            account_id: account_id.to_string(),
            access_token: access_token.to_string(),
            media_type,
            media_url: media_url.to_string(),
            caption: Some(caption.to_string()),
            is_carousel_item: false,
        }
    }

    pub fn carousel_item(account_id: &str, access_token: &str, media_url: &str) -> Self {
        Self {
            account_id: account_id.to_string(),
            access_token: access_token.to_string(),
            media_type: MediaType::Image,
            media_url: media_url.to_string(),
            caption: None,
            is_carousel_item: true,
        }
    }
}

/// 媒体容器处理状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerStatus {
    InProgress,
    Finished,
    Published,
    Expired,
    Error(String),
}

impl ContainerStatus {
    /// 解析平台返回的 `status_code`
    pub fn from_code(code: &str, detail: Option<&str>) -> Self {
        match code {
            "FINISHED" => ContainerStatus::Finished,
            "PUBLISHED" => ContainerStatus::Published,
            "EXPIRED" => ContainerStatus::Expired,
            "ERROR" => ContainerStatus::Error(detail.unwrap_or("容器处理失败").to_string()),
            _ => ContainerStatus::InProgress,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ContainerStatus::InProgress)
    }
}

#[async_trait]
pub trait SocialApi: Send + Sync {
    /// 创建单媒体容器或轮播子容器，返回容器ID
    async fn create_container(&self, request: &ContainerRequest) -> Result<String, ApiError>;

    /// 以子容器创建轮播父容器
    async fn create_carousel_container(
        &self,
        account_id: &str,
        access_token: &str,
        children: &[String],
        caption: &str,
    ) -> Result<String, ApiError>;

    async fn container_status(
        &self,
        container_id: &str,
        access_token: &str,
    ) -> Result<ContainerStatus, ApiError>;

    /// 发布已处理完成的容器，返回媒体ID
    async fn publish_container(
        &self,
        account_id: &str,
        container_id: &str,
        access_token: &str,
    ) -> Result<String, ApiError>;

    async fn like(&self, media_id: &str, access_token: &str)
        -> Result<serde_json::Value, ApiError>;

    async fn comment(
        &self,
        media_id: &str,
        text: &str,
        access_token: &str,
    ) -> Result<serde_json::Value, ApiError>;

    async fn follow(&self, user_id: &str, access_token: &str)
        -> Result<serde_json::Value, ApiError>;

    async fn send_message(
        &self,
        recipient_id: &str,
        text: &str,
        access_token: &str,
    ) -> Result<serde_json::Value, ApiError>;

    async fn fetch_insights(
        &self,
        account_id: &str,
        access_token: &str,
    ) -> Result<serde_json::Value, ApiError>;
}
