use std::sync::Arc;

use anyhow::{Context, Result};
use feedq_core::{config::AppConfig, traits::SocialApi};
use feedq_infrastructure::DatabaseManager;
use feedq_queue::{JobStore, RateLimiter, RetentionSweeper};
use feedq_worker::{default_worker_id, GraphApiClient, JobProcessor, WorkerPool};
use tokio::sync::broadcast;
use tracing::{error, info};

/// 主应用程序
///
/// 持有数据库句柄、任务队列与限流器；`run` 在此基础上组装Worker池。
pub struct Application {
    config: AppConfig,
    db: DatabaseManager,
    store: Arc<JobStore>,
    rate_limiter: Arc<RateLimiter>,
    api: Option<Arc<dyn SocialApi>>,
}

impl Application {
    /// 打开数据库并执行迁移
    pub async fn new(config: AppConfig) -> Result<Self> {
        let db = DatabaseManager::open(&config.database)
            .await
            .with_context(|| format!("打开数据库失败: {}", config.database.url))?;

        let worker_id = config
            .worker
            .worker_id
            .clone()
            .unwrap_or_else(default_worker_id);
        info!(worker_id = %worker_id, database = %config.database.url, "Application initialized");

        let store = Arc::new(JobStore::from_config(
            db.job_repository(),
            worker_id,
            &config.worker,
            &config.queue,
        ));
        let rate_limiter = Arc::new(
            RateLimiter::new(db.rate_limit_repository()).with_config(config.rate_limit.clone()),
        );

        Ok(Self {
            config,
            db,
            store,
            rate_limiter,
            api: None,
        })
    }

    /// 替换第三方平台客户端，缺省使用 [`GraphApiClient`]
    pub fn with_api(mut self, api: Arc<dyn SocialApi>) -> Self {
        self.api = Some(api);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    /// 运行Worker池（以及可选的保留期清理）直到收到关闭信号
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let api: Arc<dyn SocialApi> = match &self.api {
            Some(api) => Arc::clone(api),
            None => Arc::new(GraphApiClient::new(&self.config.api).context("创建API客户端失败")?),
        };
        let processor = Arc::new(JobProcessor::from_config(
            api,
            Arc::clone(&self.rate_limiter),
            &self.config.api,
        ));
        let pool = WorkerPool::from_config(Arc::clone(&self.store), processor, &self.config.worker);

        let mut sweeper = self
            .config
            .queue
            .cleanup_enabled
            .then(|| RetentionSweeper::from_config(Arc::clone(&self.store), &self.config.queue));

        pool.start().await.context("启动Worker池失败")?;
        if let Some(sweeper) = sweeper.as_mut() {
            sweeper.start();
        }
        info!(worker_id = %self.store.worker_id(), "feedq worker running");

        let _ = shutdown_rx.recv().await;
        info!("Shutdown signal received, stopping worker");

        if let Some(sweeper) = sweeper.as_mut() {
            sweeper.stop().await;
        }
        if let Err(e) = pool.stop().await {
            error!("Failed to stop worker pool: {}", e);
        }
        Ok(())
    }

    pub async fn close(&self) {
        self.db.close().await;
    }
}
