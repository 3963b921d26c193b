use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::payload::JobPayload;

/// 默认队列名称
pub const DEFAULT_QUEUE: &str = "default";
/// 默认最大尝试次数
pub const DEFAULT_MAX_ATTEMPTS: i32 = 3;

/// 持久化任务
///
/// 一条任务记录代表一次异步外部动作（发布、互动、私信、数据拉取）。
/// 锁字段 `worker_id` / `locked_at` / `lock_expiry` 共同构成租约，
/// 租约过期后任何Worker都可以重新认领该任务。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub id: String,
    pub queue_name: String,
    pub job_type: JobType,
    pub entity_id: String,
    pub payload: JobPayload,
    pub status: JobStatus,
    pub priority: i32,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub attempts: i32,
    pub max_attempts: i32,
    pub last_error: Option<String>,
    pub result: Option<serde_json::Value>,
    pub worker_id: Option<String>,
    pub locked_at: Option<DateTime<Utc>>,
    pub lock_expiry: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// 当前租约是否由指定Worker持有
    pub fn is_leased_by(&self, worker_id: &str) -> bool {
        self.status == JobStatus::Locked && self.worker_id.as_deref() == Some(worker_id)
    }
}

/// 任务状态
///
/// ```text
/// PENDING → LOCKED → COMPLETED
///             ↓   ↘
///          PENDING  FAILED → DEAD_LETTER
///         (重试/延后)
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum JobStatus {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "LOCKED")]
    Locked,
    #[serde(rename = "PROCESSING")]
    Processing,
    #[serde(rename = "COMPLETED")]
    Completed,
    #[serde(rename = "FAILED")]
    Failed,
    #[serde(rename = "DEAD_LETTER")]
    DeadLetter,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Locked => "LOCKED",
            JobStatus::Processing => "PROCESSING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
            JobStatus::DeadLetter => "DEAD_LETTER",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(JobStatus::Pending),
            "LOCKED" => Ok(JobStatus::Locked),
            "PROCESSING" => Ok(JobStatus::Processing),
            "COMPLETED" => Ok(JobStatus::Completed),
            "FAILED" => Ok(JobStatus::Failed),
            "DEAD_LETTER" => Ok(JobStatus::DeadLetter),
            _ => Err(format!("Invalid job status: {s}")),
        }
    }
}

impl sqlx::Type<sqlx::Sqlite> for JobStatus {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <str as sqlx::Type<sqlx::Sqlite>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for JobStatus {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(s.parse::<JobStatus>()?)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for JobStatus {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Sqlite>>::encode(self.as_str(), buf)
    }
}

/// 任务类型（封闭集合，与 [`JobPayload`] 的变体一一对应）
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    PublishPost,
    EngagementAction,
    DirectMessage,
    FetchAnalytics,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::PublishPost => "publish_post",
            JobType::EngagementAction => "engagement_action",
            JobType::DirectMessage => "direct_message",
            JobType::FetchAnalytics => "fetch_analytics",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "publish_post" => Ok(JobType::PublishPost),
            "engagement_action" => Ok(JobType::EngagementAction),
            "direct_message" => Ok(JobType::DirectMessage),
            "fetch_analytics" => Ok(JobType::FetchAnalytics),
            _ => Err(format!("Invalid job type: {s}")),
        }
    }
}

impl sqlx::Type<sqlx::Sqlite> for JobType {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <str as sqlx::Type<sqlx::Sqlite>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for JobType {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(s.parse::<JobType>()?)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for JobType {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Sqlite>>::encode(self.as_str(), buf)
    }
}

/// 入队选项
#[derive(Debug, Clone, Default)]
pub struct JobOptions {
    pub scheduled_for: Option<DateTime<Utc>>,
    pub priority: Option<i32>,
    pub max_attempts: Option<i32>,
    pub queue_name: Option<String>,
}

impl JobOptions {
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn scheduled_for(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_for = Some(at);
        self
    }

    pub fn on_queue(mut self, queue_name: impl Into<String>) -> Self {
        self.queue_name = Some(queue_name.into());
        self
    }
}

/// 待插入的任务行，由 JobStore 在校验通过后构造
#[derive(Debug, Clone)]
pub struct NewJob {
    pub id: String,
    pub queue_name: String,
    pub payload: JobPayload,
    pub priority: i32,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub max_attempts: i32,
    pub created_at: DateTime<Utc>,
}

impl NewJob {
    pub fn new(payload: JobPayload, options: JobOptions, now: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            queue_name: options
                .queue_name
                .unwrap_or_else(|| DEFAULT_QUEUE.to_string()),
            payload,
            priority: options.priority.unwrap_or(0),
            scheduled_for: options.scheduled_for,
            max_attempts: options.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS),
            created_at: now,
        }
    }

    pub fn job_type(&self) -> JobType {
        self.payload.job_type()
    }

    pub fn entity_id(&self) -> &str {
        self.payload.entity_id()
    }
}

/// 任务列表过滤器
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub limit: Option<i64>,
}

/// 失败处理结果
#[derive(Debug, Clone, PartialEq)]
pub enum FailOutcome {
    /// 仍有剩余次数，已重新排期
    Retrying {
        attempts: i32,
        next_run: DateTime<Utc>,
    },
    /// 重试次数耗尽，进入 FAILED 终态
    Exhausted { attempts: i32 },
    /// 租约已不属于当前Worker（被取消或被他人认领），未做任何修改
    Ignored,
}

/// 任务统计
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobStats {
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
    pub dead_letter: i64,
    pub total: i64,
}

impl JobStats {
    /// 按状态累加分组计数
    pub fn add(&mut self, status: JobStatus, count: i64) {
        match status {
            JobStatus::Pending => self.pending += count,
            JobStatus::Locked | JobStatus::Processing => self.processing += count,
            JobStatus::Completed => self.completed += count,
            JobStatus::Failed => self.failed += count,
            JobStatus::DeadLetter => self.dead_letter += count,
        }
        self.total += count;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::payload::{FetchAnalyticsPayload, JobPayload};
    use chrono::Duration;

    fn job_at(now: DateTime<Utc>) -> Job {
        let payload = JobPayload::FetchAnalytics(FetchAnalyticsPayload {
            entity_id: "feed-1".to_string(),
            access_token: None,
            external_account_id: None,
        });
        Job {
            id: "job-1".to_string(),
            queue_name: DEFAULT_QUEUE.to_string(),
            job_type: payload.job_type(),
            entity_id: "feed-1".to_string(),
            payload,
            status: JobStatus::Pending,
            priority: 0,
            scheduled_for: None,
            attempts: 0,
            max_attempts: 3,
            last_error: None,
            result: None,
            worker_id: None,
            locked_at: None,
            lock_expiry: None,
            created_at: now,
            updated_at: now,
            processed_at: None,
            completed_at: None,
        }
    }

    #[test]
    fn test_lease_ownership() {
        let now = Utc::now();
        let mut job = job_at(now);
        assert!(!job.is_leased_by("worker-a"));

        job.status = JobStatus::Locked;
        job.worker_id = Some("worker-a".to_string());
        job.lock_expiry = Some(now + Duration::seconds(30));
        assert!(job.is_leased_by("worker-a"));
        assert!(!job.is_leased_by("worker-b"));

        job.status = JobStatus::Completed;
        assert!(!job.is_leased_by("worker-a"));
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            JobStatus::Pending,
            JobStatus::Locked,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::DeadLetter,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("RUNNING".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_stats_buckets() {
        let mut stats = JobStats::default();
        stats.add(JobStatus::Locked, 2);
        stats.add(JobStatus::Processing, 1);
        stats.add(JobStatus::Pending, 4);
        assert_eq!(stats.processing, 3);
        assert_eq!(stats.pending, 4);
        assert_eq!(stats.total, 7);
    }

    #[test]
    fn test_new_job_defaults() {
        let now = Utc::now();
        let payload = job_at(now).payload;
        let new_job = NewJob::new(payload, JobOptions::default(), now);
        assert_eq!(new_job.queue_name, DEFAULT_QUEUE);
        assert_eq!(new_job.max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert_eq!(new_job.priority, 0);
        assert_eq!(new_job.job_type(), JobType::FetchAnalytics);
    }
}
