use std::sync::Arc;
use std::time::Duration;

use feedq_core::{
    config::DatabaseConfig,
    models::{
        next_hourly_reset, ActionType, DirectMessagePayload, EngagementKind, EngagementPayload,
        JobOptions, JobPayload, JobStatus, MediaType, PublishPostPayload,
    },
    traits::ApiError,
};
use feedq_infrastructure::DatabaseManager;
use feedq_queue::{JobStore, RateLimiter};
use feedq_worker::{testing::FakeApi, HandlerOutcome, JobProcessor, PublishSettings, WorkerPool};
use serde_json::json;
use tempfile::TempDir;

struct Harness {
    _dir: TempDir,
    _db: DatabaseManager,
    store: Arc<JobStore>,
    limiter: Arc<RateLimiter>,
    api: Arc<FakeApi>,
    processor: Arc<JobProcessor>,
}

async fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let config = DatabaseConfig {
        url: format!("sqlite:{}", dir.path().join("processor.db").display()),
        ..DatabaseConfig::default()
    };
    let db = DatabaseManager::open(&config).await.unwrap();
    let store = Arc::new(JobStore::new(db.job_repository(), "worker-a"));
    let limiter = Arc::new(RateLimiter::new(db.rate_limit_repository()));
    // 私信总是被平台拒绝
    let api = Arc::new(FakeApi::new().fail_on(
        "message:",
        ApiError::remote("(#10) This message is sent outside of allowed window"),
    ));
    let processor = Arc::new(JobProcessor::new(
        api.clone(),
        limiter.clone(),
        PublishSettings {
            poll_interval: Duration::from_millis(1),
            max_poll_attempts: 3,
        },
    ));
    Harness {
        _dir: dir,
        _db: db,
        store,
        limiter,
        api,
        processor,
    }
}

fn like(entity_id: &str, target_id: &str) -> JobPayload {
    JobPayload::EngagementAction(EngagementPayload {
        entity_id: entity_id.to_string(),
        rule_id: "rule-1".to_string(),
        target_id: target_id.to_string(),
        access_token: "token".to_string(),
        action_kind: EngagementKind::Like,
        comment_text: None,
    })
}

#[tokio::test]
async fn test_process_dispatches_by_payload_variant() {
    let h = harness().await;

    let outcome = h
        .processor
        .process(&JobPayload::PublishPost(PublishPostPayload {
            entity_id: "feed-1".to_string(),
            scheduled_post_id: None,
            caption: "launch".to_string(),
            media_urls: vec!["a.jpg".to_string()],
            media_type: MediaType::Image,
            access_token: "token".to_string(),
            external_account_id: "acct".to_string(),
        }))
        .await;
    assert_eq!(
        outcome,
        HandlerOutcome::success(json!({"media_id": "media-1", "container_id": "c-a.jpg"}))
    );

    let outcome = h
        .processor
        .process(&JobPayload::DirectMessage(DirectMessagePayload {
            entity_id: "feed-1".to_string(),
            target_id: "user-1".to_string(),
            access_token: "token".to_string(),
            message_text: "hi".to_string(),
        }))
        .await;
    assert_eq!(
        outcome,
        HandlerOutcome::failure("(#10) This message is sent outside of allowed window")
    );

    assert_eq!(
        h.api.calls(),
        vec![
            "create:a.jpg",
            "status:c-a.jpg",
            "publish:c-a.jpg",
            "message:user-1"
        ]
    );
}

#[tokio::test]
async fn test_pool_defers_jobs_over_hourly_quota() {
    let h = harness().await;
    h.limiter
        .set_custom_limits("feed-1", ActionType::Like, 100, 1)
        .await
        .unwrap();

    let first = h
        .store
        .add_job(like("feed-1", "m-1"), JobOptions::default().with_priority(10))
        .await
        .unwrap();
    let second = h
        .store
        .add_job(like("feed-1", "m-2"), JobOptions::default())
        .await
        .unwrap();

    let pool = WorkerPool::new(
        h.store.clone(),
        h.processor.clone(),
        1,
        Duration::from_millis(10),
        Duration::from_secs(5),
    );
    pool.start().await.unwrap();

    let mut deferred = None;
    for _ in 0..250 {
        let job = h.store.get_job(&second).await.unwrap().unwrap();
        if job.status == JobStatus::Pending && job.last_error.is_some() {
            deferred = Some(job);
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    pool.stop().await.unwrap();

    let first = h.store.get_job(&first).await.unwrap().unwrap();
    assert_eq!(first.status, JobStatus::Completed);

    let deferred = deferred.expect("second job was not deferred");
    assert_eq!(deferred.attempts, 0);
    let scheduled = deferred.scheduled_for.unwrap();
    assert!(scheduled <= next_hourly_reset(chrono::Utc::now()));
    assert!(scheduled > chrono::Utc::now());

    assert_eq!(h.api.calls(), vec!["like:m-1"]);
}

#[tokio::test]
async fn test_remote_failure_is_recorded_on_job() {
    let h = harness().await;
    let id = h
        .store
        .add_job(
            JobPayload::DirectMessage(DirectMessagePayload {
                entity_id: "feed-1".to_string(),
                target_id: "user-1".to_string(),
                access_token: "token".to_string(),
                message_text: "hi".to_string(),
            }),
            JobOptions::default().with_max_attempts(1),
        )
        .await
        .unwrap();

    let pool = WorkerPool::new(
        h.store.clone(),
        h.processor.clone(),
        1,
        Duration::from_millis(10),
        Duration::from_secs(5),
    );
    pool.start().await.unwrap();
    let mut job = h.store.get_job(&id).await.unwrap().unwrap();
    for _ in 0..250 {
        if job.status == JobStatus::Failed {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        job = h.store.get_job(&id).await.unwrap().unwrap();
    }
    pool.stop().await.unwrap();

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(
        job.last_error.as_deref(),
        Some("(#10) This message is sent outside of allowed window")
    );
}
