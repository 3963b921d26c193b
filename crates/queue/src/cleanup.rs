use std::sync::Arc;
use std::time::Duration;

use feedq_core::{config::QueueConfig, QueueResult};
use tokio::{sync::oneshot, task::JoinHandle, time::interval};
use tracing::{error, info, warn};

use crate::job_store::JobStore;

/// 终态任务的定期清理
///
/// 每隔 `interval` 调用一次 [`JobStore::cleanup`]，删除超过保留天数的终态任务。
pub struct RetentionSweeper {
    store: Arc<JobStore>,
    retention_days: i64,
    interval: Duration,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl RetentionSweeper {
    pub fn new(store: Arc<JobStore>, retention_days: i64, interval: Duration) -> Self {
        Self {
            store,
            retention_days,
            interval,
            shutdown_tx: None,
            handle: None,
        }
    }

    pub fn from_config(store: Arc<JobStore>, config: &QueueConfig) -> Self {
        Self::new(
            store,
            config.retention_days,
            Duration::from_secs(config.cleanup_interval_seconds),
        )
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    pub fn start(&mut self) {
        if self.handle.is_some() {
            return;
        }

        info!(
            retention_days = self.retention_days,
            interval_seconds = self.interval.as_secs(),
            "Starting retention sweeper"
        );

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        self.shutdown_tx = Some(shutdown_tx);

        let store = self.store.clone();
        let retention_days = self.retention_days;
        let period = self.interval;

        self.handle = Some(tokio::spawn(async move {
            let mut ticker = interval(period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = store.cleanup(retention_days).await {
                            error!("Retention sweep failed: {}", e);
                        }
                    }
                    _ = &mut shutdown_rx => break,
                }
            }
            info!("Retention sweeper stopped");
        }));
    }

    pub async fn stop(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }

        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!("Error waiting for retention sweeper to stop: {}", e);
            }
        }
    }

    /// 立即执行一次清理
    pub async fn sweep_once(&self) -> QueueResult<u64> {
        self.store.cleanup(self.retention_days).await
    }
}
