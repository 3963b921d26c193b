use async_trait::async_trait;
use chrono::{DateTime, Utc};
use feedq_core::{
    models::{Job, JobFilter, JobStatus, NewJob},
    traits::JobRepository,
    QueueResult,
};
use sqlx::{sqlite::SqliteRow, Row, Sqlite, SqlitePool};
use tracing::{debug, instrument};

use crate::database::mapping::MappingHelpers;

const JOB_COLUMNS: &str = "id, queue_name, job_type, entity_id, payload, status, priority, \
     scheduled_for, attempts, max_attempts, last_error, result, worker_id, locked_at, \
     lock_expiry, created_at, updated_at, processed_at, completed_at";

/// 默认列表条数
const DEFAULT_LIST_LIMIT: i64 = 50;

pub struct SqliteJobRepository {
    pool: SqlitePool,
}

impl SqliteJobRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_job(row: &SqliteRow) -> QueueResult<Job> {
        Ok(Job {
            id: row.try_get("id")?,
            queue_name: row.try_get("queue_name")?,
            job_type: row.try_get("job_type")?,
            entity_id: row.try_get("entity_id")?,
            payload: MappingHelpers::get_json(row, "payload")?,
            status: row.try_get("status")?,
            priority: row.try_get("priority")?,
            scheduled_for: MappingHelpers::get_opt_time(row, "scheduled_for")?,
            attempts: row.try_get("attempts")?,
            max_attempts: row.try_get("max_attempts")?,
            last_error: row.try_get("last_error")?,
            result: MappingHelpers::get_opt_json(row, "result")?,
            worker_id: row.try_get("worker_id")?,
            locked_at: MappingHelpers::get_opt_time(row, "locked_at")?,
            lock_expiry: MappingHelpers::get_opt_time(row, "lock_expiry")?,
            created_at: MappingHelpers::get_time(row, "created_at")?,
            updated_at: MappingHelpers::get_time(row, "updated_at")?,
            processed_at: MappingHelpers::get_opt_time(row, "processed_at")?,
            completed_at: MappingHelpers::get_opt_time(row, "completed_at")?,
        })
    }

    async fn insert_with<'e, E>(executor: E, job: &NewJob) -> QueueResult<()>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        let payload = serde_json::to_string(&job.payload)?;
        let created_at = MappingHelpers::to_millis(job.created_at);

        sqlx::query(
            "INSERT INTO jobs (id, queue_name, job_type, entity_id, payload, status, priority,
                               scheduled_for, attempts, max_attempts, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, 'PENDING', ?, ?, 0, ?, ?, ?)",
        )
        .bind(&job.id)
        .bind(&job.queue_name)
        .bind(job.job_type())
        .bind(job.entity_id())
        .bind(payload)
        .bind(job.priority)
        .bind(MappingHelpers::opt_to_millis(job.scheduled_for))
        .bind(job.max_attempts)
        .bind(created_at)
        .bind(created_at)
        .execute(executor)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl JobRepository for SqliteJobRepository {
    #[instrument(skip(self, job), fields(job_id = %job.id, job_type = %job.job_type()))]
    async fn insert(&self, job: &NewJob) -> QueueResult<()> {
        Self::insert_with(&self.pool, job).await?;
        debug!("创建任务成功: {}", job.id);
        Ok(())
    }

    #[instrument(skip(self, jobs), fields(count = jobs.len()))]
    async fn insert_batch(&self, jobs: &[NewJob]) -> QueueResult<()> {
        let mut tx = self.pool.begin().await?;
        for job in jobs {
            // 出错时 tx 被丢弃，事务自动回滚
            Self::insert_with(&mut *tx, job).await?;
        }
        tx.commit().await?;

        debug!("批量创建 {} 个任务成功", jobs.len());
        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> QueueResult<Option<Job>> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_job).transpose()
    }

    async fn find_claim_candidate(
        &self,
        now: DateTime<Utc>,
        exclude: &[String],
    ) -> QueueResult<Option<Job>> {
        let now = MappingHelpers::to_millis(now);
        let excluded = if exclude.is_empty() {
            String::new()
        } else {
            format!("AND id NOT IN ({})", vec!["?"; exclude.len()].join(", "))
        };
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM jobs
             WHERE status IN ('PENDING', 'LOCKED')
               AND (lock_expiry IS NULL OR lock_expiry < ?)
               AND (scheduled_for IS NULL OR scheduled_for <= ?)
               {excluded}
             ORDER BY priority DESC, scheduled_for ASC, created_at ASC
             LIMIT 1"
        );
        let mut query = sqlx::query(&sql).bind(now).bind(now);
        for id in exclude {
            query = query.bind(id);
        }
        let row = query.fetch_optional(&self.pool).await?;

        row.as_ref().map(Self::row_to_job).transpose()
    }

    #[instrument(skip(self, candidate), fields(job_id = %candidate.id))]
    async fn try_claim(
        &self,
        candidate: &Job,
        worker_id: &str,
        now: DateTime<Utc>,
        lock_expiry: DateTime<Utc>,
    ) -> QueueResult<Option<Job>> {
        let now_ms = MappingHelpers::to_millis(now);
        // WHERE 子句重新校验第一阶段读到的状态与锁字段
        let sql = format!(
            "UPDATE jobs
             SET status = 'LOCKED', worker_id = ?, locked_at = ?, lock_expiry = ?,
                 processed_at = ?, updated_at = ?
             WHERE id = ?
               AND status = ?
               AND status IN ('PENDING', 'LOCKED')
               AND worker_id IS ?
               AND lock_expiry IS ?
               AND (lock_expiry IS NULL OR lock_expiry < ?)
               AND (scheduled_for IS NULL OR scheduled_for <= ?)
             RETURNING {JOB_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(worker_id)
            .bind(now_ms)
            .bind(MappingHelpers::to_millis(lock_expiry))
            .bind(now_ms)
            .bind(now_ms)
            .bind(&candidate.id)
            .bind(candidate.status)
            .bind(candidate.worker_id.as_deref())
            .bind(MappingHelpers::opt_to_millis(candidate.lock_expiry))
            .bind(now_ms)
            .bind(now_ms)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                debug!("认领任务成功: {} -> {}", candidate.id, worker_id);
                Self::row_to_job(&row).map(Some)
            }
            None => {
                debug!("任务 {} 已被其他Worker认领", candidate.id);
                Ok(None)
            }
        }
    }

    async fn mark_completed(
        &self,
        id: &str,
        worker_id: &str,
        result: Option<&serde_json::Value>,
        now: DateTime<Utc>,
    ) -> QueueResult<bool> {
        let result = result.map(serde_json::to_string).transpose()?;
        let now = MappingHelpers::to_millis(now);
        let query_result = sqlx::query(
            "UPDATE jobs
             SET status = 'COMPLETED', result = ?, worker_id = NULL, locked_at = NULL,
                 lock_expiry = NULL, processed_at = ?, completed_at = ?, updated_at = ?
             WHERE id = ? AND status = 'LOCKED' AND worker_id = ?",
        )
        .bind(result)
        .bind(now)
        .bind(now)
        .bind(now)
        .bind(id)
        .bind(worker_id)
        .execute(&self.pool)
        .await?;

        Ok(query_result.rows_affected() == 1)
    }

    async fn mark_retry(
        &self,
        id: &str,
        worker_id: &str,
        attempts: i32,
        next_run: DateTime<Utc>,
        error: &str,
        now: DateTime<Utc>,
    ) -> QueueResult<bool> {
        let query_result = sqlx::query(
            "UPDATE jobs
             SET status = 'PENDING', attempts = ?, scheduled_for = ?, last_error = ?,
                 worker_id = NULL, locked_at = NULL, lock_expiry = NULL, updated_at = ?
             WHERE id = ? AND status = 'LOCKED' AND worker_id = ? AND attempts = ?",
        )
        .bind(attempts)
        .bind(MappingHelpers::to_millis(next_run))
        .bind(error)
        .bind(MappingHelpers::to_millis(now))
        .bind(id)
        .bind(worker_id)
        .bind(attempts - 1)
        .execute(&self.pool)
        .await?;

        Ok(query_result.rows_affected() == 1)
    }

    async fn mark_exhausted(
        &self,
        id: &str,
        worker_id: &str,
        attempts: i32,
        error: &str,
        now: DateTime<Utc>,
    ) -> QueueResult<bool> {
        let now = MappingHelpers::to_millis(now);
        let query_result = sqlx::query(
            "UPDATE jobs
             SET status = 'FAILED', attempts = ?, last_error = ?, worker_id = NULL,
                 locked_at = NULL, lock_expiry = NULL, processed_at = ?, updated_at = ?
             WHERE id = ? AND status = 'LOCKED' AND worker_id = ? AND attempts = ?",
        )
        .bind(attempts)
        .bind(error)
        .bind(now)
        .bind(now)
        .bind(id)
        .bind(worker_id)
        .bind(attempts - 1)
        .execute(&self.pool)
        .await?;

        Ok(query_result.rows_affected() == 1)
    }

    async fn mark_deferred(
        &self,
        id: &str,
        worker_id: &str,
        until: DateTime<Utc>,
        reason: &str,
        now: DateTime<Utc>,
    ) -> QueueResult<bool> {
        let query_result = sqlx::query(
            "UPDATE jobs
             SET status = 'PENDING', scheduled_for = ?, last_error = ?, worker_id = NULL,
                 locked_at = NULL, lock_expiry = NULL, updated_at = ?
             WHERE id = ? AND status = 'LOCKED' AND worker_id = ?",
        )
        .bind(MappingHelpers::to_millis(until))
        .bind(reason)
        .bind(MappingHelpers::to_millis(now))
        .bind(id)
        .bind(worker_id)
        .execute(&self.pool)
        .await?;

        Ok(query_result.rows_affected() == 1)
    }

    async fn cancel(&self, id: &str, now: DateTime<Utc>) -> QueueResult<bool> {
        let query_result = sqlx::query(
            "UPDATE jobs
             SET status = 'FAILED', last_error = 'cancelled', worker_id = NULL,
                 locked_at = NULL, lock_expiry = NULL, updated_at = ?
             WHERE id = ? AND status IN ('PENDING', 'LOCKED')",
        )
        .bind(MappingHelpers::to_millis(now))
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(query_result.rows_affected() == 1)
    }

    async fn move_to_dead_letter(&self, id: &str, now: DateTime<Utc>) -> QueueResult<bool> {
        let query_result = sqlx::query(
            "UPDATE jobs SET status = 'DEAD_LETTER', updated_at = ?
             WHERE id = ? AND status = 'FAILED'",
        )
        .bind(MappingHelpers::to_millis(now))
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(query_result.rows_affected() == 1)
    }

    async fn requeue(&self, id: &str, now: DateTime<Utc>) -> QueueResult<bool> {
        let query_result = sqlx::query(
            "UPDATE jobs
             SET status = 'PENDING', attempts = 0, scheduled_for = NULL, worker_id = NULL,
                 locked_at = NULL, lock_expiry = NULL, processed_at = NULL,
                 completed_at = NULL, updated_at = ?
             WHERE id = ? AND status IN ('FAILED', 'DEAD_LETTER')",
        )
        .bind(MappingHelpers::to_millis(now))
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(query_result.rows_affected() == 1)
    }

    async fn count_by_status(&self) -> QueueResult<Vec<(JobStatus, i64)>> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS count FROM jobs GROUP BY status")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| -> QueueResult<(JobStatus, i64)> {
                Ok((row.try_get("status")?, row.try_get("count")?))
            })
            .collect()
    }

    async fn list_by_entity(&self, entity_id: &str, filter: &JobFilter) -> QueueResult<Vec<Job>> {
        let mut sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE entity_id = ?");
        if filter.status.is_some() {
            sql.push_str(" AND status = ?");
        }
        sql.push_str(" ORDER BY created_at DESC, rowid DESC LIMIT ?");

        let mut query = sqlx::query(&sql).bind(entity_id);
        if let Some(status) = filter.status {
            query = query.bind(status);
        }
        let rows = query
            .bind(filter.limit.unwrap_or(DEFAULT_LIST_LIMIT))
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::row_to_job).collect()
    }

    async fn delete_terminal_before(&self, cutoff: DateTime<Utc>) -> QueueResult<u64> {
        let result = sqlx::query(
            "DELETE FROM jobs
             WHERE status IN ('COMPLETED', 'FAILED', 'DEAD_LETTER') AND updated_at < ?",
        )
        .bind(MappingHelpers::to_millis(cutoff))
        .execute(&self.pool)
        .await?;

        let deleted_count = result.rows_affected();
        debug!("清理了 {} 条过期任务", deleted_count);
        Ok(deleted_count)
    }
}
