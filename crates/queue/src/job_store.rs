use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use feedq_core::{
    config::{QueueConfig, WorkerConfig},
    models::{FailOutcome, Job, JobFilter, JobOptions, JobPayload, JobStats, NewJob},
    traits::JobRepository,
    QueueError, QueueResult,
};
use metrics::counter;
use tracing::{debug, info, instrument, warn};

use crate::retry_policy::RetryPolicy;

/// 默认租约时长
const DEFAULT_LEASE_SECONDS: i64 = 300;

/// 持久化任务队列
///
/// 每个 `JobStore` 代表一个Worker身份：认领得到的租约记在 `worker_id` 名下，
/// 之后的完成、失败与延后写入都以“状态仍为 LOCKED 且租约属于自己”为条件。
pub struct JobStore {
    repository: Arc<dyn JobRepository>,
    worker_id: String,
    lease_duration: Duration,
    retry_policy: RetryPolicy,
    default_max_attempts: i32,
}

impl JobStore {
    pub fn new(repository: Arc<dyn JobRepository>, worker_id: impl Into<String>) -> Self {
        Self {
            repository,
            worker_id: worker_id.into(),
            lease_duration: Duration::seconds(DEFAULT_LEASE_SECONDS),
            retry_policy: RetryPolicy::default(),
            default_max_attempts: feedq_core::models::DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn from_config(
        repository: Arc<dyn JobRepository>,
        worker_id: impl Into<String>,
        worker: &WorkerConfig,
        queue: &QueueConfig,
    ) -> Self {
        Self::new(repository, worker_id)
            .with_lease_duration(Duration::seconds(worker.lease_duration_seconds as i64))
            .with_retry_policy(RetryPolicy::from(&queue.retry))
            .with_default_max_attempts(queue.default_max_attempts)
    }

    pub fn with_lease_duration(mut self, lease_duration: Duration) -> Self {
        self.lease_duration = lease_duration;
        self
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn with_default_max_attempts(mut self, max_attempts: i32) -> Self {
        self.default_max_attempts = max_attempts;
        self
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    fn prepare(
        &self,
        payload: JobPayload,
        options: JobOptions,
        now: DateTime<Utc>,
    ) -> QueueResult<NewJob> {
        payload.validate()?;
        if let Some(max_attempts) = options.max_attempts {
            if max_attempts <= 0 {
                return Err(QueueError::validation("max_attempts 必须大于0"));
            }
        }
        if options
            .queue_name
            .as_deref()
            .is_some_and(|name| name.trim().is_empty())
        {
            return Err(QueueError::validation("queue_name 不能为空"));
        }

        let options = JobOptions {
            max_attempts: options.max_attempts.or(Some(self.default_max_attempts)),
            ..options
        };
        Ok(NewJob::new(payload, options, now))
    }

    /// 校验并入队一个任务，返回任务ID
    #[instrument(skip(self, payload, options), fields(job_type = %payload.job_type(), entity_id = %payload.entity_id()))]
    pub async fn add_job(&self, payload: JobPayload, options: JobOptions) -> QueueResult<String> {
        let job = self.prepare(payload, options, Utc::now())?;
        self.repository.insert(&job).await?;

        info!(job_id = %job.id, priority = job.priority, "Job enqueued");
        Ok(job.id)
    }

    /// 先校验全部任务，再在单个事务中插入
    pub async fn add_jobs(&self, batch: Vec<(JobPayload, JobOptions)>) -> QueueResult<Vec<String>> {
        let now = Utc::now();
        let jobs = batch
            .into_iter()
            .map(|(payload, options)| self.prepare(payload, options, now))
            .collect::<QueueResult<Vec<_>>>()?;

        if jobs.is_empty() {
            return Ok(Vec::new());
        }

        self.repository.insert_batch(&jobs).await?;

        info!(count = jobs.len(), "Job batch enqueued");
        Ok(jobs.into_iter().map(|job| job.id).collect())
    }

    /// 认领下一个可执行的任务，没有可认领任务或被其他Worker抢先时返回 `None`
    pub async fn get_next_job(&self) -> QueueResult<Option<Job>> {
        self.get_next_job_at(Utc::now()).await
    }

    pub async fn get_next_job_at(&self, now: DateTime<Utc>) -> QueueResult<Option<Job>> {
        self.claim_next(now, &[]).await
    }

    /// 认领下一个任务，跳过 `exclude` 中的任务
    ///
    /// Worker池传入自己仍在执行的任务ID：这些任务的租约即使已经过期，
    /// 也不能被同一个Worker再次认领。
    pub async fn get_next_job_excluding(&self, exclude: &[String]) -> QueueResult<Option<Job>> {
        self.claim_next(Utc::now(), exclude).await
    }

    async fn claim_next(&self, now: DateTime<Utc>, exclude: &[String]) -> QueueResult<Option<Job>> {
        let Some(candidate) = self.repository.find_claim_candidate(now, exclude).await? else {
            return Ok(None);
        };

        let lock_expiry = now + self.lease_duration;
        let claimed = self
            .repository
            .try_claim(&candidate, &self.worker_id, now, lock_expiry)
            .await?;

        match &claimed {
            Some(job) => {
                counter!("feedq_jobs_claimed_total").increment(1);
                debug!(
                    job_id = %job.id,
                    job_type = %job.job_type,
                    attempts = job.attempts,
                    lock_expiry = %lock_expiry,
                    "Job claimed"
                );
            }
            None => debug!(job_id = %candidate.id, "Lost claim race"),
        }

        Ok(claimed)
    }

    pub async fn complete_job(
        &self,
        id: &str,
        result: Option<serde_json::Value>,
    ) -> QueueResult<bool> {
        let completed = self
            .repository
            .mark_completed(id, &self.worker_id, result.as_ref(), Utc::now())
            .await?;

        if completed {
            counter!("feedq_jobs_completed_total").increment(1);
            info!(job_id = id, "Job completed");
        } else {
            warn!(job_id = id, worker_id = %self.worker_id, "Completion ignored, lease no longer held");
        }
        Ok(completed)
    }

    pub async fn fail_job(&self, id: &str, error: &str) -> QueueResult<FailOutcome> {
        self.fail_job_at(id, error, Utc::now()).await
    }

    /// 记录一次失败：仍有剩余次数时按重试策略重新排期，否则进入 FAILED
    pub async fn fail_job_at(
        &self,
        id: &str,
        error: &str,
        now: DateTime<Utc>,
    ) -> QueueResult<FailOutcome> {
        let job = match self.repository.get_by_id(id).await? {
            Some(job) if job.is_leased_by(&self.worker_id) => job,
            _ => {
                warn!(job_id = id, worker_id = %self.worker_id, "Failure ignored, lease no longer held");
                return Ok(FailOutcome::Ignored);
            }
        };

        let attempts = job.attempts + 1;
        let outcome = if attempts < job.max_attempts {
            let next_run = self.retry_policy.next_run(attempts, now);
            let updated = self
                .repository
                .mark_retry(id, &self.worker_id, attempts, next_run, error, now)
                .await?;
            if !updated {
                return Ok(FailOutcome::Ignored);
            }
            counter!("feedq_jobs_failed_total", "outcome" => "retrying").increment(1);
            FailOutcome::Retrying { attempts, next_run }
        } else {
            let updated = self
                .repository
                .mark_exhausted(id, &self.worker_id, attempts, error, now)
                .await?;
            if !updated {
                return Ok(FailOutcome::Ignored);
            }
            counter!("feedq_jobs_failed_total", "outcome" => "exhausted").increment(1);
            FailOutcome::Exhausted { attempts }
        };

        warn!(
            job_id = id,
            attempts,
            max_attempts = job.max_attempts,
            error,
            outcome = ?outcome,
            "Job failed"
        );
        Ok(outcome)
    }

    /// 释放租约并延后到 `until`，不消耗尝试次数
    pub async fn defer_job(
        &self,
        id: &str,
        until: DateTime<Utc>,
        reason: &str,
    ) -> QueueResult<bool> {
        let deferred = self
            .repository
            .mark_deferred(id, &self.worker_id, until, reason, Utc::now())
            .await?;

        if deferred {
            counter!("feedq_jobs_deferred_total").increment(1);
            info!(job_id = id, until = %until, reason, "Job deferred");
        } else {
            warn!(job_id = id, worker_id = %self.worker_id, "Deferral ignored, lease no longer held");
        }
        Ok(deferred)
    }

    pub async fn cancel_job(&self, id: &str) -> QueueResult<bool> {
        let cancelled = self.repository.cancel(id, Utc::now()).await?;
        if cancelled {
            info!(job_id = id, "Job cancelled");
        }
        Ok(cancelled)
    }

    pub async fn get_stats(&self) -> QueueResult<JobStats> {
        let mut stats = JobStats::default();
        for (status, count) in self.repository.count_by_status().await? {
            stats.add(status, count);
        }
        Ok(stats)
    }

    /// 删除更新时间早于 `older_than_days` 天前的终态任务
    pub async fn cleanup(&self, older_than_days: i64) -> QueueResult<u64> {
        if older_than_days < 0 {
            return Err(QueueError::validation("保留天数不能为负数"));
        }
        let cutoff = Duration::try_days(older_than_days)
            .and_then(|age| Utc::now().checked_sub_signed(age))
            .ok_or_else(|| QueueError::validation("保留天数超出范围"))?;
        let deleted = self.repository.delete_terminal_before(cutoff).await?;

        if deleted > 0 {
            info!(deleted, older_than_days, "Terminal jobs removed");
        }
        Ok(deleted)
    }

    pub async fn get_job(&self, id: &str) -> QueueResult<Option<Job>> {
        self.repository.get_by_id(id).await
    }

    /// 某个实体的任务，按创建时间倒序
    pub async fn get_jobs_for_feed(
        &self,
        entity_id: &str,
        filter: JobFilter,
    ) -> QueueResult<Vec<Job>> {
        if filter.limit.is_some_and(|limit| limit <= 0) {
            return Err(QueueError::validation("limit 必须大于0"));
        }
        self.repository.list_by_entity(entity_id, &filter).await
    }

    pub async fn move_to_dead_letter(&self, id: &str) -> QueueResult<bool> {
        let moved = self.repository.move_to_dead_letter(id, Utc::now()).await?;
        if moved {
            info!(job_id = id, "Job moved to dead letter");
        }
        Ok(moved)
    }

    /// 将 FAILED / DEAD_LETTER 任务重新放回队列，尝试次数清零
    pub async fn requeue(&self, id: &str) -> QueueResult<bool> {
        let requeued = self.repository.requeue(id, Utc::now()).await?;
        if requeued {
            info!(job_id = id, "Job requeued");
        }
        Ok(requeued)
    }
}
