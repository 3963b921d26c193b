use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, DurationRound, Utc};
use serde::{Deserialize, Serialize};

/// 受限流约束的动作类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Post,
    Like,
    Comment,
    Follow,
    DirectMessage,
    ApiCall,
}

impl ActionType {
    pub const ALL: [ActionType; 6] = [
        ActionType::Post,
        ActionType::Like,
        ActionType::Comment,
        ActionType::Follow,
        ActionType::DirectMessage,
        ActionType::ApiCall,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Post => "post",
            ActionType::Like => "like",
            ActionType::Comment => "comment",
            ActionType::Follow => "follow",
            ActionType::DirectMessage => "direct_message",
            ActionType::ApiCall => "api_call",
        }
    }

    /// 默认限额 (daily, hourly)
    ///
    /// 私信这类敏感动作的额度远低于点赞这类高频动作。
    pub fn default_limits(&self) -> WindowLimits {
        let (daily, hourly) = match self {
            ActionType::Post => (25, 5),
            ActionType::Like => (500, 60),
            ActionType::Comment => (100, 20),
            ActionType::Follow => (150, 20),
            ActionType::DirectMessage => (50, 10),
            ActionType::ApiCall => (4800, 200),
        };
        WindowLimits { daily, hourly }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ActionType::ALL
            .into_iter()
            .find(|action| action.as_str() == s)
            .ok_or_else(|| format!("Invalid action type: {s}"))
    }
}

impl sqlx::Type<sqlx::Sqlite> for ActionType {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <str as sqlx::Type<sqlx::Sqlite>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for ActionType {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(s.parse::<ActionType>()?)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for ActionType {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Sqlite>>::encode(self.as_str(), buf)
    }
}

/// 日/小时两个窗口的额度
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct WindowLimits {
    pub daily: i32,
    pub hourly: i32,
}

/// 日/小时两个窗口的剩余次数
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct WindowRemaining {
    pub daily: i32,
    pub hourly: i32,
}

/// 日/小时两个窗口的重置时间
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct WindowResets {
    pub daily: DateTime<Utc>,
    pub hourly: DateTime<Utc>,
}

/// 下一个UTC零点
pub fn next_daily_reset(now: DateTime<Utc>) -> DateTime<Utc> {
    now.duration_trunc(Duration::days(1)).unwrap_or(now) + Duration::days(1)
}

/// 下一个整点
pub fn next_hourly_reset(now: DateTime<Utc>) -> DateTime<Utc> {
    now.duration_trunc(Duration::hours(1)).unwrap_or(now) + Duration::hours(1)
}

/// 限流记录，以 (entity_id, action_type) 为键
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RateLimitRecord {
    pub entity_id: String,
    pub action_type: ActionType,
    pub daily_limit: i32,
    pub daily_count: i32,
    pub daily_reset_at: DateTime<Utc>,
    pub hourly_limit: i32,
    pub hourly_count: i32,
    pub hourly_reset_at: DateTime<Utc>,
    pub blocked_until: Option<DateTime<Utc>>,
    pub block_reason: Option<String>,
    /// 管理员设置过自定义额度后不再回落到默认值
    pub custom_limits: bool,
    pub updated_at: DateTime<Utc>,
}

impl RateLimitRecord {
    /// 使用动作类型的默认额度创建新记录
    pub fn with_defaults(entity_id: &str, action_type: ActionType, now: DateTime<Utc>) -> Self {
        let limits = action_type.default_limits();
        Self {
            entity_id: entity_id.to_string(),
            action_type,
            daily_limit: limits.daily,
            daily_count: 0,
            daily_reset_at: next_daily_reset(now),
            hourly_limit: limits.hourly,
            hourly_count: 0,
            hourly_reset_at: next_hourly_reset(now),
            blocked_until: None,
            block_reason: None,
            custom_limits: false,
            updated_at: now,
        }
    }

    /// 惰性重置已过期的窗口并清除已过期的封禁，返回记录是否发生变化
    pub fn refresh(&mut self, now: DateTime<Utc>) -> bool {
        let mut changed = false;

        if self.daily_reset_at <= now {
            self.daily_count = 0;
            self.daily_reset_at = next_daily_reset(now);
            changed = true;
        }
        if self.hourly_reset_at <= now {
            self.hourly_count = 0;
            self.hourly_reset_at = next_hourly_reset(now);
            changed = true;
        }
        if self.blocked_until.is_some_and(|until| until <= now) {
            self.blocked_until = None;
            self.block_reason = None;
            changed = true;
        }

        if changed {
            self.updated_at = now;
        }
        changed
    }

    pub fn remaining(&self) -> WindowRemaining {
        WindowRemaining {
            daily: (self.daily_limit - self.daily_count).max(0),
            hourly: (self.hourly_limit - self.hourly_count).max(0),
        }
    }

    pub fn resets(&self) -> WindowResets {
        WindowResets {
            daily: self.daily_reset_at,
            hourly: self.hourly_reset_at,
        }
    }

    pub fn is_blocked_at(&self, now: DateTime<Utc>) -> bool {
        self.blocked_until.is_some_and(|until| until > now)
    }

    /// 在已刷新记录上评估是否允许执行
    pub fn status(&self, now: DateTime<Utc>) -> RateLimitStatus {
        let remaining = self.remaining();
        let blocked = self.is_blocked_at(now);
        RateLimitStatus {
            allowed: !blocked && remaining.daily > 0 && remaining.hourly > 0,
            remaining,
            reset_times: self.resets(),
            blocked_until: if blocked { self.blocked_until } else { None },
            block_reason: if blocked {
                self.block_reason.clone()
            } else {
                None
            },
        }
    }

    /// 计数达到上限时应设置的封禁
    ///
    /// 只有一个窗口耗尽时封禁到该窗口重置；两个窗口同时耗尽时封禁到较晚的重置时间。
    pub fn exhaustion_block(&self) -> Option<(DateTime<Utc>, String)> {
        let daily_exhausted = self.daily_count >= self.daily_limit;
        let hourly_exhausted = self.hourly_count >= self.hourly_limit;

        match (daily_exhausted, hourly_exhausted) {
            (true, true) => Some((
                self.daily_reset_at.max(self.hourly_reset_at),
                format!(
                    "{} 日额度 ({}) 与小时额度 ({}) 均已用尽",
                    self.action_type, self.daily_limit, self.hourly_limit
                ),
            )),
            (true, false) => Some((
                self.daily_reset_at,
                format!("{} 日额度 ({}) 已用尽", self.action_type, self.daily_limit),
            )),
            (false, true) => Some((
                self.hourly_reset_at,
                format!(
                    "{} 小时额度 ({}) 已用尽",
                    self.action_type, self.hourly_limit
                ),
            )),
            (false, false) => None,
        }
    }
}

/// `check_limit` 的返回值
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RateLimitStatus {
    pub allowed: bool,
    pub remaining: WindowRemaining,
    pub reset_times: WindowResets,
    pub blocked_until: Option<DateTime<Utc>>,
    pub block_reason: Option<String>,
}

impl RateLimitStatus {
    /// 最早可以再次执行的时间
    pub fn retry_at(&self) -> Option<DateTime<Utc>> {
        if self.allowed {
            return None;
        }
        if let Some(until) = self.blocked_until {
            return Some(until);
        }
        let mut at: Option<DateTime<Utc>> = None;
        if self.remaining.daily == 0 {
            at = Some(self.reset_times.daily);
        }
        if self.remaining.hourly == 0 {
            at = Some(at.map_or(self.reset_times.hourly, |t| t.max(self.reset_times.hourly)));
        }
        at
    }

    /// 用于日志与延后原因的描述
    pub fn denial_reason(&self) -> String {
        if let Some(reason) = &self.block_reason {
            return reason.clone();
        }
        match (self.remaining.daily, self.remaining.hourly) {
            (0, 0) => "日额度与小时额度均已用尽".to_string(),
            (0, _) => "日额度已用尽".to_string(),
            (_, 0) => "小时额度已用尽".to_string(),
            _ => "已限流".to_string(),
        }
    }
}

/// 当日用量
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DailyUsage {
    pub used: i32,
    pub limit: i32,
    pub remaining: i32,
}

impl From<&RateLimitRecord> for DailyUsage {
    fn from(record: &RateLimitRecord) -> Self {
        Self {
            used: record.daily_count,
            limit: record.daily_limit,
            remaining: record.remaining().daily,
        }
    }
}
