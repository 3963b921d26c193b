//! 日志与指标初始化

use std::net::SocketAddr;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// 安装全局 tracing 订阅器
///
/// `RUST_LOG` 存在时优先于 `level`；`format` 取值 `json` 或 `pretty`。
pub fn init_logging(level: &str, format: &str) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(env_filter);

    match format {
        "json" => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(false)
                .with_target(true);
            registry
                .with(fmt_layer)
                .try_init()
                .context("初始化日志失败")?;
        }
        _ => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .pretty()
                .with_file(false)
                .with_line_number(false)
                .with_target(true);
            registry
                .with(fmt_layer)
                .try_init()
                .context("初始化日志失败")?;
        }
    }

    info!(logging.level = level, logging.format = format, "Logging initialized");
    Ok(())
}

/// 在 `bind_address` 上启动 Prometheus 抓取端点并安装全局指标记录器
pub fn init_metrics(bind_address: &str) -> Result<()> {
    let addr: SocketAddr = bind_address
        .parse()
        .with_context(|| format!("指标监听地址无效: {bind_address}"))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {e}"))?;

    info!(%addr, "Metrics exporter listening");
    Ok(())
}
