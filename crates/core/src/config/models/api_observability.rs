use serde::{Deserialize, Serialize};

/// 第三方 Graph API 客户端配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiConfig {
    pub base_url: String,
    pub request_timeout_seconds: u64,
    /// 发布容器状态轮询间隔
    pub publish_poll_interval_ms: u64,
    /// 发布容器状态最大轮询次数
    pub publish_max_poll_attempts: u32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://graph.facebook.com/v21.0".to_string(),
            request_timeout_seconds: 30,
            publish_poll_interval_ms: 5000,
            publish_max_poll_attempts: 30,
        }
    }
}

impl ApiConfig {
    /// 单个发布任务最坏情况下的状态轮询耗时，再加一次请求超时
    pub fn publish_budget(&self) -> std::time::Duration {
        std::time::Duration::from_millis(
            self.publish_poll_interval_ms
                .saturating_mul(u64::from(self.publish_max_poll_attempts)),
        ) + std::time::Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(anyhow::anyhow!("API地址格式无效: {}", self.base_url));
        }

        if self.request_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("请求超时时间必须大于0"));
        }

        if self.publish_max_poll_attempts == 0 {
            return Err(anyhow::anyhow!("发布轮询次数必须大于0"));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub log_format: String,
    pub metrics_enabled: bool,
    pub metrics_bind_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: false,
            metrics_bind_address: "0.0.0.0:9090".to_string(),
        }
    }
}

impl ObservabilityConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.as_str()) {
            return Err(anyhow::anyhow!(
                "无效的日志级别: {}，支持的级别: {:?}",
                self.log_level,
                valid_levels
            ));
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.log_format.as_str()) {
            return Err(anyhow::anyhow!("不支持的日志格式: {}", self.log_format));
        }

        if self.metrics_enabled {
            self.metrics_bind_address
                .parse::<std::net::SocketAddr>()
                .map_err(|e| anyhow::anyhow!("指标监听地址无效: {e}"))?;
        }

        Ok(())
    }
}
