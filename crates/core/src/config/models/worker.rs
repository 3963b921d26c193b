use serde::{Deserialize, Serialize};

/// 租约时长上限（秒）
pub const MAX_LEASE_SECONDS: u64 = 24 * 3600;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerConfig {
    /// 为空时使用 `<hostname>-<pid>`
    pub worker_id: Option<String>,
    pub concurrency: usize,
    pub poll_interval_ms: u64,
    pub lease_duration_seconds: u64,
    pub shutdown_timeout_seconds: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: None,
            concurrency: 5,
            poll_interval_ms: 1000,
            lease_duration_seconds: 300,
            shutdown_timeout_seconds: 30,
        }
    }
}

impl WorkerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if let Some(worker_id) = &self.worker_id {
            if worker_id.trim().is_empty() {
                return Err(anyhow::anyhow!("Worker ID不能为空"));
            }
        }

        if self.concurrency == 0 {
            return Err(anyhow::anyhow!("最大并发任务数必须大于0"));
        }

        if self.poll_interval_ms == 0 {
            return Err(anyhow::anyhow!("任务轮询间隔必须大于0"));
        }

        if self.lease_duration_seconds == 0 || self.lease_duration_seconds > MAX_LEASE_SECONDS {
            return Err(anyhow::anyhow!(
                "租约时长必须在1-{}秒之间",
                MAX_LEASE_SECONDS
            ));
        }

        // 关闭超时不能替代租约过期：被放弃的任务要等租约过期才能被重新认领
        if self.shutdown_timeout_seconds > self.lease_duration_seconds {
            return Err(anyhow::anyhow!(
                "关闭超时 ({}s) 不能大于租约时长 ({}s)",
                self.shutdown_timeout_seconds,
                self.lease_duration_seconds
            ));
        }

        Ok(())
    }
}
