//! 行映射辅助函数
//!
//! 时间统一以整数毫秒存储，JSON字段以文本存储。

use chrono::{DateTime, Utc};
use feedq_core::{QueueError, QueueResult};
use serde::de::DeserializeOwned;
use sqlx::{sqlite::SqliteRow, Row};

pub struct MappingHelpers;

impl MappingHelpers {
    pub fn to_millis(value: DateTime<Utc>) -> i64 {
        value.timestamp_millis()
    }

    pub fn opt_to_millis(value: Option<DateTime<Utc>>) -> Option<i64> {
        value.map(Self::to_millis)
    }

    pub fn from_millis(millis: i64) -> QueueResult<DateTime<Utc>> {
        DateTime::from_timestamp_millis(millis)
            .ok_or_else(|| QueueError::Serialization(format!("无效的时间戳: {millis}")))
    }

    pub fn get_time(row: &SqliteRow, field: &str) -> QueueResult<DateTime<Utc>> {
        let millis: i64 = row.try_get(field)?;
        Self::from_millis(millis)
    }

    pub fn get_opt_time(row: &SqliteRow, field: &str) -> QueueResult<Option<DateTime<Utc>>> {
        row.try_get::<Option<i64>, _>(field)?
            .map(Self::from_millis)
            .transpose()
    }

    pub fn get_json<T: DeserializeOwned>(row: &SqliteRow, field: &str) -> QueueResult<T> {
        let text: String = row.try_get(field)?;
        serde_json::from_str(&text)
            .map_err(|e| QueueError::Serialization(format!("解析字段 {field} 失败: {e}")))
    }

    pub fn get_opt_json<T: DeserializeOwned>(
        row: &SqliteRow,
        field: &str,
    ) -> QueueResult<Option<T>> {
        match row.try_get::<Option<String>, _>(field)? {
            Some(text) => serde_json::from_str(&text)
                .map(Some)
                .map_err(|e| QueueError::Serialization(format!("解析字段 {field} 失败: {e}"))),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_millis_conversion_keeps_millisecond_precision() {
        let now = Utc::now();
        let restored = MappingHelpers::from_millis(MappingHelpers::to_millis(now)).unwrap();
        assert_eq!(restored.timestamp_millis(), now.timestamp_millis());
        assert!(MappingHelpers::from_millis(i64::MAX).is_err());
    }
}
