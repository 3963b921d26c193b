use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use feedq_core::{config::WorkerConfig, models::Job, QueueError, QueueResult};
use feedq_queue::JobStore;
use futures::future::join_all;
use metrics::histogram;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::processor::{HandlerOutcome, JobExecutor};

/// `<hostname>-<pid>`
pub fn default_worker_id() -> String {
    let host = hostname::get()
        .unwrap_or_else(|_| "unknown".into())
        .to_string_lossy()
        .to_string();
    format!("{host}-{}", std::process::id())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStatus {
    pub is_running: bool,
    pub active_jobs: usize,
    pub concurrency: usize,
}

/// 有并发上限的任务执行池
///
/// 轮询循环在空闲槽位内不断认领任务，每个任务在独立的 tokio 任务中执行，
/// 执行结束后按处理结果写回完成、失败或延后。
pub struct WorkerPool {
    store: Arc<JobStore>,
    executor: Arc<dyn JobExecutor>,
    concurrency: usize,
    poll_interval: Duration,
    shutdown_timeout: Duration,
    in_flight: Arc<RwLock<HashSet<String>>>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
    poll_handle: Mutex<Option<JoinHandle<()>>>,
    shutdown_tx: RwLock<Option<broadcast::Sender<()>>>,
    is_running: RwLock<bool>,
}

impl WorkerPool {
    pub fn new(
        store: Arc<JobStore>,
        executor: Arc<dyn JobExecutor>,
        concurrency: usize,
        poll_interval: Duration,
        shutdown_timeout: Duration,
    ) -> Self {
        Self {
            store,
            executor,
            concurrency: concurrency.max(1),
            poll_interval,
            shutdown_timeout,
            in_flight: Arc::new(RwLock::new(HashSet::new())),
            tasks: Arc::new(Mutex::new(Vec::new())),
            poll_handle: Mutex::new(None),
            shutdown_tx: RwLock::new(None),
            is_running: RwLock::new(false),
        }
    }

    pub fn from_config(
        store: Arc<JobStore>,
        executor: Arc<dyn JobExecutor>,
        config: &WorkerConfig,
    ) -> Self {
        Self::new(
            store,
            executor,
            config.concurrency,
            Duration::from_millis(config.poll_interval_ms),
            Duration::from_secs(config.shutdown_timeout_seconds),
        )
    }

    pub fn worker_id(&self) -> &str {
        self.store.worker_id()
    }

    pub async fn start(&self) -> QueueResult<()> {
        let mut is_running = self.is_running.write().await;
        if *is_running {
            return Err(QueueError::Internal("Worker pool already running".to_string()));
        }

        info!(
            worker_id = %self.store.worker_id(),
            concurrency = self.concurrency,
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Starting worker pool"
        );

        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
        *self.shutdown_tx.write().await = Some(shutdown_tx);

        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let store = Arc::clone(&self.store);
        let executor = Arc::clone(&self.executor);
        let in_flight = Arc::clone(&self.in_flight);
        let tasks = Arc::clone(&self.tasks);
        let concurrency = self.concurrency;

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        Self::fill_slots(&store, &executor, &in_flight, &tasks, concurrency).await;
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Job polling shutting down");
                        break;
                    }
                }
            }
        });
        *self.poll_handle.lock().await = Some(handle);

        *is_running = true;
        Ok(())
    }

    /// 停止轮询并等待执行中的任务，超时后放弃等待
    ///
    /// 被放弃的任务不会解锁，租约过期后由其他Worker重新认领。
    pub async fn stop(&self) -> QueueResult<()> {
        // 先翻转运行标志再等待，排空期间 get_status 不被阻塞
        let (shutdown_tx, poll_handle) = {
            let mut is_running = self.is_running.write().await;
            if !*is_running {
                return Ok(());
            }
            *is_running = false;
            (
                self.shutdown_tx.write().await.take(),
                self.poll_handle.lock().await.take(),
            )
        };

        info!(worker_id = %self.store.worker_id(), "Stopping worker pool");

        if let Some(tx) = shutdown_tx {
            let _ = tx.send(());
        }
        if let Some(handle) = poll_handle {
            if let Err(e) = handle.await {
                warn!("Error waiting for polling loop to stop: {}", e);
            }
        }

        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock().await);
        if !handles.is_empty() {
            info!(in_flight = handles.len(), "Waiting for in-flight jobs");
            if timeout(self.shutdown_timeout, join_all(handles)).await.is_err() {
                let abandoned: Vec<String> = self.in_flight.read().await.iter().cloned().collect();
                warn!(
                    abandoned = ?abandoned,
                    timeout_seconds = self.shutdown_timeout.as_secs(),
                    "Shutdown timeout reached, abandoning in-flight jobs until their leases expire"
                );
            }
        }

        info!(worker_id = %self.store.worker_id(), "Worker pool stopped");
        Ok(())
    }

    pub async fn get_status(&self) -> PoolStatus {
        PoolStatus {
            is_running: *self.is_running.read().await,
            active_jobs: self.in_flight.read().await.len(),
            concurrency: self.concurrency,
        }
    }

    /// 在空闲槽位内认领任务，没有可认领任务或出错时结束本轮
    async fn fill_slots(
        store: &Arc<JobStore>,
        executor: &Arc<dyn JobExecutor>,
        in_flight: &Arc<RwLock<HashSet<String>>>,
        tasks: &Arc<Mutex<Vec<JoinHandle<()>>>>,
        concurrency: usize,
    ) {
        tasks.lock().await.retain(|handle| !handle.is_finished());

        loop {
            // 自己仍在执行的任务即使租约过期也不再认领
            let running: Vec<String> = {
                let guard = in_flight.read().await;
                if guard.len() >= concurrency {
                    break;
                }
                guard.iter().cloned().collect()
            };

            let job = match store.get_next_job_excluding(&running).await {
                Ok(Some(job)) => job,
                Ok(None) => break,
                Err(e) => {
                    error!("Job polling failed: {}", e);
                    break;
                }
            };

            in_flight.write().await.insert(job.id.clone());

            let store = Arc::clone(store);
            let executor = Arc::clone(executor);
            let in_flight = Arc::clone(in_flight);
            let handle = tokio::spawn(async move {
                let job_id = job.id.clone();
                Self::run_job(&store, executor, job).await;
                in_flight.write().await.remove(&job_id);
            });
            tasks.lock().await.push(handle);
        }
    }

    async fn run_job(store: &JobStore, executor: Arc<dyn JobExecutor>, job: Job) {
        let started = Instant::now();
        let job_type = job.job_type.as_str();
        debug!(job_id = %job.id, job_type, attempts = job.attempts, "Executing job");

        // 处理器 panic 时按失败处理
        let running = Arc::new(job);
        let task_job = Arc::clone(&running);
        let outcome =
            match tokio::spawn(async move { executor.execute(&task_job).await }).await {
                Ok(outcome) => outcome,
                Err(e) => HandlerOutcome::failure(format!("handler aborted: {e}")),
            };
        let job = running;

        let elapsed_ms = started.elapsed().as_millis() as f64;
        histogram!("feedq_job_duration_ms", "job_type" => job_type, "outcome" => outcome.kind())
            .record(elapsed_ms);

        let written = match outcome {
            HandlerOutcome::Success { data } => store.complete_job(&job.id, Some(data)).await.map(|_| ()),
            HandlerOutcome::Failure { error } => store.fail_job(&job.id, &error).await.map(|_| ()),
            HandlerOutcome::RateLimited { until, reason } => {
                store.defer_job(&job.id, until, &reason).await.map(|_| ())
            }
        };

        if let Err(e) = written {
            error!(job_id = %job.id, "Failed to record job outcome: {}", e);
        }
    }
}
