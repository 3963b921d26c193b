//! 测试替身
//!
//! 启用 `testing` feature 后对其他crate的测试可见。

use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use feedq_core::traits::{ApiError, ContainerRequest, ContainerStatus, SocialApi};
use serde_json::{json, Value};

/// 按脚本返回结果并记录调用的 `SocialApi`
///
/// 每次调用记为 `<动作>:<参数>`，例如 `create:a.jpg`、`like:m-1`。
/// `fail_on` 注册的前缀命中时返回对应错误，`fail_all` 让所有调用失败。
#[derive(Default)]
pub struct FakeApi {
    calls: Mutex<Vec<String>>,
    statuses: Mutex<Vec<ContainerStatus>>,
    failures: Mutex<Vec<(String, ApiError)>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl FakeApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// 容器状态按顺序返回，用完后返回 `Finished`
    pub fn with_statuses(self, statuses: Vec<ContainerStatus>) -> Self {
        *lock(&self.statuses) = statuses;
        self
    }

    pub fn fail_on(self, prefix: &str, error: ApiError) -> Self {
        lock(&self.failures).push((prefix.to_string(), error));
        self
    }

    pub fn fail_all(self, error: ApiError) -> Self {
        self.fail_on("", error)
    }

    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    fn call(&self, name: String) -> Result<(), ApiError> {
        let failure = lock(&self.failures)
            .iter()
            .find(|(prefix, _)| name.starts_with(prefix.as_str()))
            .map(|(_, error)| error.clone());
        lock(&self.calls).push(name);
        match failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl SocialApi for FakeApi {
    async fn create_container(&self, request: &ContainerRequest) -> Result<String, ApiError> {
        self.call(format!("create:{}", request.media_url))?;
        Ok(format!("c-{}", request.media_url))
    }

    async fn create_carousel_container(
        &self,
        _account_id: &str,
        _access_token: &str,
        children: &[String],
        _caption: &str,
    ) -> Result<String, ApiError> {
        self.call(format!("carousel:{}", children.join(",")))?;
        Ok("c-parent".to_string())
    }

    async fn container_status(
        &self,
        container_id: &str,
        _access_token: &str,
    ) -> Result<ContainerStatus, ApiError> {
        self.call(format!("status:{container_id}"))?;
        let mut statuses = lock(&self.statuses);
        if statuses.is_empty() {
            Ok(ContainerStatus::Finished)
        } else {
            Ok(statuses.remove(0))
        }
    }

    async fn publish_container(
        &self,
        _account_id: &str,
        container_id: &str,
        _access_token: &str,
    ) -> Result<String, ApiError> {
        self.call(format!("publish:{container_id}"))?;
        Ok("media-1".to_string())
    }

    async fn like(&self, media_id: &str, _access_token: &str) -> Result<Value, ApiError> {
        self.call(format!("like:{media_id}"))?;
        Ok(json!({"success": true}))
    }

    async fn comment(
        &self,
        media_id: &str,
        text: &str,
        _access_token: &str,
    ) -> Result<Value, ApiError> {
        self.call(format!("comment:{media_id}:{text}"))?;
        Ok(json!({"id": "comment-1"}))
    }

    async fn follow(&self, user_id: &str, _access_token: &str) -> Result<Value, ApiError> {
        self.call(format!("follow:{user_id}"))?;
        Ok(json!({"success": true}))
    }

    async fn send_message(
        &self,
        recipient_id: &str,
        _text: &str,
        _access_token: &str,
    ) -> Result<Value, ApiError> {
        self.call(format!("message:{recipient_id}"))?;
        Ok(json!({"message_id": "m-1"}))
    }

    async fn fetch_insights(&self, account_id: &str, _access_token: &str) -> Result<Value, ApiError> {
        self.call(format!("insights:{account_id}"))?;
        Ok(json!({"account": account_id, "followers_count": 42}))
    }
}
