//! 持久化端口
//!
//! 队列语义（认领、重试、限流窗口）都建立在这里的原子条件更新之上，
//! 不依赖进程内的锁，因此多个Worker进程可以共享同一个存储。

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    models::{ActionType, Job, JobFilter, JobStatus, NewJob, RateLimitRecord},
    QueueResult,
};

/// 任务存储
#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn insert(&self, job: &NewJob) -> QueueResult<()>;

    /// 在单个事务中插入所有任务，任一失败则全部回滚
    async fn insert_batch(&self, jobs: &[NewJob]) -> QueueResult<()>;

    async fn get_by_id(&self, id: &str) -> QueueResult<Option<Job>>;

    /// 只读选择下一个可认领的任务：优先级降序、计划时间升序、创建时间升序
    ///
    /// `exclude` 中的任务ID不参与选择。
    async fn find_claim_candidate(
        &self,
        now: DateTime<Utc>,
        exclude: &[String],
    ) -> QueueResult<Option<Job>>;

    /// 条件更新认领任务
    ///
    /// 仅当状态与锁字段仍与 `candidate` 一致时才写入新租约；
    /// 被其他Worker抢先时返回 `None`，这不是错误。
    async fn try_claim(
        &self,
        candidate: &Job,
        worker_id: &str,
        now: DateTime<Utc>,
        lock_expiry: DateTime<Utc>,
    ) -> QueueResult<Option<Job>>;

    /// 租约持有者标记完成
    async fn mark_completed(
        &self,
        id: &str,
        worker_id: &str,
        result: Option<&serde_json::Value>,
        now: DateTime<Utc>,
    ) -> QueueResult<bool>;

    /// 租约持有者记录一次失败并重新排期，`attempts` 为递增后的次数
    async fn mark_retry(
        &self,
        id: &str,
        worker_id: &str,
        attempts: i32,
        next_run: DateTime<Utc>,
        error: &str,
        now: DateTime<Utc>,
    ) -> QueueResult<bool>;

    /// 租约持有者记录最后一次失败，任务进入 FAILED
    async fn mark_exhausted(
        &self,
        id: &str,
        worker_id: &str,
        attempts: i32,
        error: &str,
        now: DateTime<Utc>,
    ) -> QueueResult<bool>;

    /// 租约持有者释放任务并延后到 `until`，不消耗尝试次数
    async fn mark_deferred(
        &self,
        id: &str,
        worker_id: &str,
        until: DateTime<Utc>,
        reason: &str,
        now: DateTime<Utc>,
    ) -> QueueResult<bool>;

    /// PENDING/LOCKED → FAILED("cancelled")
    async fn cancel(&self, id: &str, now: DateTime<Utc>) -> QueueResult<bool>;

    /// FAILED → DEAD_LETTER
    async fn move_to_dead_letter(&self, id: &str, now: DateTime<Utc>) -> QueueResult<bool>;

    /// FAILED/DEAD_LETTER → PENDING，尝试次数清零
    async fn requeue(&self, id: &str, now: DateTime<Utc>) -> QueueResult<bool>;

    async fn count_by_status(&self) -> QueueResult<Vec<(JobStatus, i64)>>;

    async fn list_by_entity(&self, entity_id: &str, filter: &JobFilter) -> QueueResult<Vec<Job>>;

    /// 删除 `updated_at` 早于 `cutoff` 的终态任务
    async fn delete_terminal_before(&self, cutoff: DateTime<Utc>) -> QueueResult<u64>;
}

/// 限流记录存储
#[async_trait]
pub trait RateLimitRepository: Send + Sync {
    async fn get(
        &self,
        entity_id: &str,
        action_type: ActionType,
    ) -> QueueResult<Option<RateLimitRecord>>;

    /// 记录不存在时插入，已存在时不做修改
    async fn insert_if_absent(&self, record: &RateLimitRecord) -> QueueResult<()>;

    /// 在一条更新语句内重置已到期的窗口并清除已过期的封禁
    ///
    /// 未到期的字段保持原值，不会覆盖并发的计数递增。
    async fn refresh(
        &self,
        entity_id: &str,
        action_type: ActionType,
        now: DateTime<Utc>,
    ) -> QueueResult<Option<RateLimitRecord>>;

    /// 原子地将两个窗口计数各加一，返回更新后的记录
    async fn increment(
        &self,
        entity_id: &str,
        action_type: ActionType,
        now: DateTime<Utc>,
    ) -> QueueResult<Option<RateLimitRecord>>;

    async fn set_block(
        &self,
        entity_id: &str,
        action_type: ActionType,
        until: Option<DateTime<Utc>>,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> QueueResult<bool>;

    async fn set_limits(
        &self,
        entity_id: &str,
        action_type: ActionType,
        daily_limit: i32,
        hourly_limit: i32,
        now: DateTime<Utc>,
    ) -> QueueResult<bool>;

    async fn reset_counters(
        &self,
        entity_id: &str,
        action_type: ActionType,
        now: DateTime<Utc>,
    ) -> QueueResult<bool>;

    async fn list_for_entity(&self, entity_id: &str) -> QueueResult<Vec<RateLimitRecord>>;
}
