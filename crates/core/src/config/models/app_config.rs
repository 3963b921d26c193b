use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{
    api_observability::{ApiConfig, ObservabilityConfig},
    database::DatabaseConfig,
    queue::{QueueConfig, RateLimitConfig},
    worker::WorkerConfig,
};

/// 默认配置文件搜索路径
pub const DEFAULT_CONFIG_PATHS: [&str; 3] = [
    "config/feedq.toml",
    "feedq.toml",
    "/etc/feedq/config.toml",
];

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// Load configuration from config file and environment variables
    ///
    /// Load order:
    /// 1. Default configuration
    /// 2. Config file (TOML format)
    /// 3. Environment variable overrides (prefix: FEEDQ_, nested keys separated by `__`)
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let defaults =
            ConfigBuilder::try_from(&AppConfig::default()).context("构建默认配置失败")?;
        let mut builder = ConfigBuilder::builder().add_source(defaults);

        if let Some(path) = config_path {
            if !Path::new(path).exists() {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        } else if let Some(path) = DEFAULT_CONFIG_PATHS
            .iter()
            .find(|path| Path::new(path).exists())
        {
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        }

        builder = builder.add_source(
            Environment::with_prefix("FEEDQ")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    /// Load configuration from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;

        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to TOML string
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    pub fn validate(&self) -> Result<()> {
        self.database.validate().context("数据库配置验证失败")?;
        self.worker.validate().context("Worker配置验证失败")?;
        self.queue.validate().context("队列配置验证失败")?;
        self.rate_limit.validate().context("限流配置验证失败")?;
        self.api.validate().context("API配置验证失败")?;
        self.observability
            .validate()
            .context("可观测性配置验证失败")?;

        // 执行中的任务租约过期后会被其他Worker重新认领
        let budget = self.api.publish_budget();
        if self.worker.lease_duration_seconds < budget.as_secs() {
            return Err(anyhow::anyhow!(
                "租约时长 ({}s) 短于发布任务的最长执行时间 ({}s)",
                self.worker.lease_duration_seconds,
                budget.as_secs()
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::models::RetryStrategy;
    use crate::models::ActionType;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.queue.retry.strategy, RetryStrategy::Linear);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = AppConfig::from_toml(
            r#"
            [worker]
            concurrency = 8
            poll_interval_ms = 250
            lease_duration_seconds = 240
            shutdown_timeout_seconds = 20

            [rate_limit.overrides.like]
            daily = 200
            hourly = 30
            "#,
        )
        .unwrap();

        assert_eq!(config.worker.concurrency, 8);
        assert_eq!(config.database, DatabaseConfig::default());
        assert_eq!(config.rate_limit.limits_for(ActionType::Like).daily, 200);
        assert_eq!(
            config.rate_limit.limits_for(ActionType::Post),
            ActionType::Post.default_limits()
        );
    }

    #[test]
    fn test_shutdown_timeout_longer_than_lease_is_rejected() {
        let mut config = AppConfig::default();
        config.worker.lease_duration_seconds = 10;
        config.worker.shutdown_timeout_seconds = 60;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_lease_shorter_than_publish_budget_is_rejected() {
        let mut config = AppConfig::default();
        config.worker.lease_duration_seconds = 60;
        config.worker.shutdown_timeout_seconds = 30;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("租约时长"));

        config.api.publish_poll_interval_ms = 1000;
        config.api.publish_max_poll_attempts = 20;
        config.api.request_timeout_seconds = 10;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_round_trip() {
        let config = AppConfig::default();
        let text = config.to_toml().unwrap();
        assert_eq!(AppConfig::from_toml(&text).unwrap(), config);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[database]\nurl = \"sqlite:/tmp/feedq-test.db\"\nmax_connections = 4\nmin_connections = 1\nconnection_timeout_seconds = 5\nidle_timeout_seconds = 60\nbusy_timeout_seconds = 2"
        )
        .unwrap();

        let config = AppConfig::load(file.path().to_str()).unwrap();
        assert_eq!(config.database.max_connections, 4);
        assert_eq!(config.worker, WorkerConfig::default());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(AppConfig::load(Some("/nonexistent/feedq.toml")).is_err());
    }
}
