use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use feedq::{
    app::Application,
    cli::{self, Cli, Commands},
    shutdown::{wait_for_shutdown_signal, ShutdownManager},
};
use feedq_core::config::AppConfig;
use feedq_infrastructure::{init_logging, init_metrics};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load(cli.config.as_deref()).context("加载配置失败")?;
    if let Some(worker_id) = cli.worker_id {
        config.worker.worker_id = Some(worker_id);
    }

    let log_level = cli
        .log_level
        .unwrap_or_else(|| config.observability.log_level.clone());
    let log_format = cli
        .log_format
        .unwrap_or_else(|| config.observability.log_format.clone());
    init_logging(&log_level, &log_format)?;

    let app = Application::new(config).await?;

    let result = match cli.command {
        Commands::Run => run(app).await,
        command => {
            let output = cli::execute(&app, command).await;
            app.close().await;
            let output = output?;
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(())
        }
    };

    if let Err(e) = &result {
        error!("feedq exited with error: {:#}", e);
    }
    result
}

async fn run(app: Application) -> Result<()> {
    let observability = &app.config().observability;
    if observability.metrics_enabled {
        init_metrics(&observability.metrics_bind_address)?;
    }

    let shutdown_manager = ShutdownManager::new();
    let shutdown_rx = shutdown_manager.subscribe().await;

    let app = Arc::new(app);
    let mut runner = {
        let app = Arc::clone(&app);
        tokio::spawn(async move { app.run(shutdown_rx).await })
    };

    tokio::select! {
        _ = wait_for_shutdown_signal() => {
            shutdown_manager.shutdown().await;
        }
        finished = &mut runner => {
            // 未收到信号就退出说明启动失败
            app.close().await;
            return finished.context("Worker任务异常退出")?;
        }
    }

    let result = runner.await.context("Worker任务异常退出")?;
    app.close().await;
    info!("feedq stopped");
    result
}
