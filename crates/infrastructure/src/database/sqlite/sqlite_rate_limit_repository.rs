use async_trait::async_trait;
use chrono::{DateTime, Utc};
use feedq_core::{
    models::{next_daily_reset, next_hourly_reset, ActionType, RateLimitRecord},
    traits::RateLimitRepository,
    QueueResult,
};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use tracing::debug;

use crate::database::mapping::MappingHelpers;

const RATE_LIMIT_COLUMNS: &str = "entity_id, action_type, daily_limit, daily_count, \
     daily_reset_at, hourly_limit, hourly_count, hourly_reset_at, blocked_until, \
     block_reason, custom_limits, updated_at";

pub struct SqliteRateLimitRepository {
    pool: SqlitePool,
}

impl SqliteRateLimitRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_record(row: &SqliteRow) -> QueueResult<RateLimitRecord> {
        Ok(RateLimitRecord {
            entity_id: row.try_get("entity_id")?,
            action_type: row.try_get("action_type")?,
            daily_limit: row.try_get("daily_limit")?,
            daily_count: row.try_get("daily_count")?,
            daily_reset_at: MappingHelpers::get_time(row, "daily_reset_at")?,
            hourly_limit: row.try_get("hourly_limit")?,
            hourly_count: row.try_get("hourly_count")?,
            hourly_reset_at: MappingHelpers::get_time(row, "hourly_reset_at")?,
            blocked_until: MappingHelpers::get_opt_time(row, "blocked_until")?,
            block_reason: row.try_get("block_reason")?,
            custom_limits: row.try_get("custom_limits")?,
            updated_at: MappingHelpers::get_time(row, "updated_at")?,
        })
    }
}

#[async_trait]
impl RateLimitRepository for SqliteRateLimitRepository {
    async fn get(
        &self,
        entity_id: &str,
        action_type: ActionType,
    ) -> QueueResult<Option<RateLimitRecord>> {
        let sql = format!(
            "SELECT {RATE_LIMIT_COLUMNS} FROM rate_limits WHERE entity_id = ? AND action_type = ?"
        );
        let row = sqlx::query(&sql)
            .bind(entity_id)
            .bind(action_type)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn insert_if_absent(&self, record: &RateLimitRecord) -> QueueResult<()> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO rate_limits
                 (entity_id, action_type, daily_limit, daily_count, daily_reset_at,
                  hourly_limit, hourly_count, hourly_reset_at, blocked_until, block_reason,
                  custom_limits, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.entity_id)
        .bind(record.action_type)
        .bind(record.daily_limit)
        .bind(record.daily_count)
        .bind(MappingHelpers::to_millis(record.daily_reset_at))
        .bind(record.hourly_limit)
        .bind(record.hourly_count)
        .bind(MappingHelpers::to_millis(record.hourly_reset_at))
        .bind(MappingHelpers::opt_to_millis(record.blocked_until))
        .bind(record.block_reason.as_deref())
        .bind(record.custom_limits)
        .bind(MappingHelpers::to_millis(record.updated_at))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            debug!(
                "创建限流记录: {} / {}",
                record.entity_id, record.action_type
            );
        }
        Ok(())
    }

    async fn refresh(
        &self,
        entity_id: &str,
        action_type: ActionType,
        now: DateTime<Utc>,
    ) -> QueueResult<Option<RateLimitRecord>> {
        // SET 中的表达式读取的都是更新前的列值
        let sql = format!(
            "UPDATE rate_limits SET
                 daily_count = CASE WHEN daily_reset_at <= $1 THEN 0 ELSE daily_count END,
                 daily_reset_at = CASE WHEN daily_reset_at <= $1 THEN $2 ELSE daily_reset_at END,
                 hourly_count = CASE WHEN hourly_reset_at <= $1 THEN 0 ELSE hourly_count END,
                 hourly_reset_at = CASE WHEN hourly_reset_at <= $1 THEN $3 ELSE hourly_reset_at END,
                 block_reason = CASE WHEN blocked_until <= $1 THEN NULL ELSE block_reason END,
                 blocked_until = CASE WHEN blocked_until <= $1 THEN NULL ELSE blocked_until END,
                 updated_at = $1
             WHERE entity_id = $4 AND action_type = $5
             RETURNING {RATE_LIMIT_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(MappingHelpers::to_millis(now))
            .bind(MappingHelpers::to_millis(next_daily_reset(now)))
            .bind(MappingHelpers::to_millis(next_hourly_reset(now)))
            .bind(entity_id)
            .bind(action_type)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn increment(
        &self,
        entity_id: &str,
        action_type: ActionType,
        now: DateTime<Utc>,
    ) -> QueueResult<Option<RateLimitRecord>> {
        let sql = format!(
            "UPDATE rate_limits
             SET daily_count = daily_count + 1, hourly_count = hourly_count + 1, updated_at = ?
             WHERE entity_id = ? AND action_type = ?
             RETURNING {RATE_LIMIT_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(MappingHelpers::to_millis(now))
            .bind(entity_id)
            .bind(action_type)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn set_block(
        &self,
        entity_id: &str,
        action_type: ActionType,
        until: Option<DateTime<Utc>>,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> QueueResult<bool> {
        let result = sqlx::query(
            "UPDATE rate_limits SET blocked_until = ?, block_reason = ?, updated_at = ?
             WHERE entity_id = ? AND action_type = ?",
        )
        .bind(MappingHelpers::opt_to_millis(until))
        .bind(reason)
        .bind(MappingHelpers::to_millis(now))
        .bind(entity_id)
        .bind(action_type)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn set_limits(
        &self,
        entity_id: &str,
        action_type: ActionType,
        daily_limit: i32,
        hourly_limit: i32,
        now: DateTime<Utc>,
    ) -> QueueResult<bool> {
        let result = sqlx::query(
            "UPDATE rate_limits
             SET daily_limit = ?, hourly_limit = ?, custom_limits = 1, updated_at = ?
             WHERE entity_id = ? AND action_type = ?",
        )
        .bind(daily_limit)
        .bind(hourly_limit)
        .bind(MappingHelpers::to_millis(now))
        .bind(entity_id)
        .bind(action_type)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn reset_counters(
        &self,
        entity_id: &str,
        action_type: ActionType,
        now: DateTime<Utc>,
    ) -> QueueResult<bool> {
        let result = sqlx::query(
            "UPDATE rate_limits
             SET daily_count = 0, hourly_count = 0, blocked_until = NULL, block_reason = NULL,
                 updated_at = ?
             WHERE entity_id = ? AND action_type = ?",
        )
        .bind(MappingHelpers::to_millis(now))
        .bind(entity_id)
        .bind(action_type)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn list_for_entity(&self, entity_id: &str) -> QueueResult<Vec<RateLimitRecord>> {
        let sql = format!(
            "SELECT {RATE_LIMIT_COLUMNS} FROM rate_limits WHERE entity_id = ? ORDER BY action_type"
        );
        let rows = sqlx::query(&sql)
            .bind(entity_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::row_to_record).collect()
    }
}
