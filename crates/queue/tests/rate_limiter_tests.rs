use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use feedq_core::{
    config::{DatabaseConfig, RateLimitConfig},
    models::{next_daily_reset, next_hourly_reset, ActionType, WindowLimits},
    traits::RateLimitRepository,
};
use feedq_infrastructure::DatabaseManager;
use feedq_queue::RateLimiter;
use tempfile::TempDir;

async fn open_limiter() -> (TempDir, DatabaseManager, RateLimiter) {
    let dir = tempfile::tempdir().unwrap();
    let config = DatabaseConfig {
        url: format!("sqlite:{}", dir.path().join("limits.db").display()),
        ..DatabaseConfig::default()
    };
    let db = DatabaseManager::open(&config).await.unwrap();
    let limiter = RateLimiter::new(db.rate_limit_repository());
    (dir, db, limiter)
}

#[tokio::test]
async fn test_first_check_creates_default_record() {
    let (_dir, _db, limiter) = open_limiter().await;

    let status = limiter
        .check_limit("feed-1", ActionType::DirectMessage)
        .await
        .unwrap();
    assert!(status.allowed);
    assert_eq!(status.remaining.daily, 50);
    assert_eq!(status.remaining.hourly, 10);
    assert!(status.blocked_until.is_none());
}

#[tokio::test]
async fn test_daily_exhaustion_blocks_until_midnight() {
    let (_dir, _db, limiter) = open_limiter().await;
    let now = Utc::now();

    limiter
        .set_custom_limits("feed-1", ActionType::Post, 3, 100)
        .await
        .unwrap();
    for _ in 0..3 {
        limiter
            .record_action_at("feed-1", ActionType::Post, now)
            .await
            .unwrap();
    }

    let blocked = limiter
        .check_limit_at("feed-1", ActionType::Post, now)
        .await
        .unwrap();
    assert!(!blocked.allowed);
    assert_eq!(blocked.remaining.daily, 0);
    assert_eq!(
        blocked.blocked_until.map(|at| at.timestamp_millis()),
        Some(next_daily_reset(now).timestamp_millis())
    );
    assert!(blocked.block_reason.is_some());

    let after_reset = limiter
        .check_limit_at(
            "feed-1",
            ActionType::Post,
            next_daily_reset(now) + Duration::seconds(1),
        )
        .await
        .unwrap();
    assert!(after_reset.allowed);
    assert_eq!(after_reset.remaining.daily, 3);
    assert!(after_reset.blocked_until.is_none());
}

#[tokio::test]
async fn test_hourly_exhaustion_blocks_until_next_hour() {
    let (_dir, _db, limiter) = open_limiter().await;
    let now = Utc::now();

    let mut last = None;
    for _ in 0..5 {
        last = Some(
            limiter
                .record_action_at("feed-1", ActionType::Post, now)
                .await
                .unwrap(),
        );
    }
    let status = last.unwrap();
    assert!(!status.allowed);
    assert_eq!(status.remaining.hourly, 0);
    assert_eq!(
        status.blocked_until.map(|at| at.timestamp_millis()),
        Some(next_hourly_reset(now).timestamp_millis())
    );

    let next_hour = limiter
        .check_limit_at(
            "feed-1",
            ActionType::Post,
            next_hourly_reset(now) + Duration::seconds(1),
        )
        .await
        .unwrap();
    assert!(next_hour.allowed);
    assert_eq!(next_hour.remaining.hourly, 5);
}

#[tokio::test]
async fn test_clear_block_and_reset_counters() {
    let (_dir, _db, limiter) = open_limiter().await;

    limiter
        .set_custom_limits("feed-1", ActionType::Comment, 10, 1)
        .await
        .unwrap();
    limiter
        .record_action("feed-1", ActionType::Comment)
        .await
        .unwrap();

    assert!(limiter
        .clear_block("feed-1", ActionType::Comment)
        .await
        .unwrap());
    let status = limiter
        .check_limit("feed-1", ActionType::Comment)
        .await
        .unwrap();
    // 解除封禁后计数仍然用尽
    assert!(status.blocked_until.is_none());
    assert!(!status.allowed);

    assert!(limiter
        .reset_counters("feed-1", ActionType::Comment)
        .await
        .unwrap());
    let status = limiter
        .check_limit("feed-1", ActionType::Comment)
        .await
        .unwrap();
    assert!(status.allowed);
    assert_eq!(status.remaining.hourly, 1);
}

#[tokio::test]
async fn test_usage_reports_every_action_type() {
    let (_dir, _db, limiter) = open_limiter().await;

    limiter
        .record_action("feed-1", ActionType::Like)
        .await
        .unwrap();
    limiter
        .record_action("feed-1", ActionType::Like)
        .await
        .unwrap();

    let usage = limiter.get_daily_usage("feed-1").await.unwrap();
    assert_eq!(usage.len(), ActionType::ALL.len());
    let like = usage[&ActionType::Like];
    assert_eq!(like.used, 2);
    assert_eq!(like.limit, 500);
    assert_eq!(like.remaining, 498);

    let limits = limiter.get_all_limits("feed-1").await.unwrap();
    assert_eq!(limits.len(), ActionType::ALL.len());
    assert!(limits.iter().all(|(_, status)| status.allowed));
}

#[tokio::test]
async fn test_configured_overrides_apply_to_new_records() {
    let (_dir, db, _) = open_limiter().await;
    let config = RateLimitConfig {
        overrides: BTreeMap::from([(
            ActionType::Follow,
            WindowLimits {
                daily: 10,
                hourly: 2,
            },
        )]),
    };
    let limiter = RateLimiter::new(db.rate_limit_repository()).with_config(config);

    let status = limiter
        .check_limit("feed-1", ActionType::Follow)
        .await
        .unwrap();
    assert_eq!(status.remaining.daily, 10);
    assert_eq!(status.remaining.hourly, 2);

    assert!(limiter
        .set_custom_limits("feed-1", ActionType::Follow, -1, 2)
        .await
        .is_err());
}

#[tokio::test]
async fn test_listing_is_scoped_to_entity_and_creates_missing_records() {
    let (_dir, db, limiter) = open_limiter().await;
    let repository: Arc<dyn RateLimitRepository> = db.rate_limit_repository();

    limiter
        .record_action("feed-2", ActionType::Comment)
        .await
        .unwrap();
    assert_eq!(repository.list_for_entity("feed-2").await.unwrap().len(), 1);
    assert!(repository.list_for_entity("feed-1").await.unwrap().is_empty());

    let usage = limiter.get_daily_usage("feed-1").await.unwrap();
    assert_eq!(usage[&ActionType::Comment].used, 0);
    assert_eq!(
        repository.list_for_entity("feed-1").await.unwrap().len(),
        ActionType::ALL.len()
    );

    let usage = limiter.get_daily_usage("feed-2").await.unwrap();
    assert_eq!(usage[&ActionType::Comment].used, 1);
    assert_eq!(usage[&ActionType::Like].used, 0);
}
