use std::sync::Arc;

use chrono::{Duration, Utc};
use feedq_core::{
    config::DatabaseConfig,
    models::{
        ActionType, DirectMessagePayload, JobFilter, JobOptions, JobPayload, JobStatus, NewJob,
        RateLimitRecord,
    },
    traits::JobRepository,
};
use feedq_infrastructure::DatabaseManager;
use tempfile::TempDir;

async fn open_database() -> (TempDir, DatabaseManager) {
    let dir = tempfile::tempdir().unwrap();
    let config = DatabaseConfig {
        url: format!("sqlite:{}", dir.path().join("repo.db").display()),
        max_connections: 4,
        ..DatabaseConfig::default()
    };
    let manager = DatabaseManager::open(&config).await.unwrap();
    (dir, manager)
}

fn message_job(entity_id: &str, options: JobOptions) -> NewJob {
    let payload = JobPayload::DirectMessage(DirectMessagePayload {
        entity_id: entity_id.to_string(),
        target_id: "user-42".to_string(),
        access_token: "token".to_string(),
        message_text: "hello".to_string(),
    });
    NewJob::new(payload, options, Utc::now())
}

#[tokio::test]
async fn test_insert_and_get_round_trip() {
    let (_dir, db) = open_database().await;
    let repo = db.job_repository();

    let job = message_job("feed-1", JobOptions::default().with_priority(3));
    repo.insert(&job).await.unwrap();

    let stored = repo.get_by_id(&job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Pending);
    assert_eq!(stored.priority, 3);
    assert_eq!(stored.entity_id, "feed-1");
    assert_eq!(stored.payload, job.payload);
    assert_eq!(stored.attempts, 0);
    assert!(stored.worker_id.is_none());

    assert!(repo.get_by_id("missing").await.unwrap().is_none());
}

#[tokio::test]
async fn test_batch_with_duplicate_id_persists_nothing() {
    let (_dir, db) = open_database().await;
    let repo = db.job_repository();

    let first = message_job("feed-1", JobOptions::default());
    let mut second = message_job("feed-1", JobOptions::default());
    second.id = first.id.clone();

    assert!(repo.insert_batch(&[first.clone(), second]).await.is_err());
    assert!(repo.get_by_id(&first.id).await.unwrap().is_none());
    assert!(repo.count_by_status().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_candidate_ordering() {
    let (_dir, db) = open_database().await;
    let repo = db.job_repository();
    let now = Utc::now();

    let low = message_job("feed-1", JobOptions::default());
    let high = message_job("feed-1", JobOptions::default().with_priority(10));
    let future = message_job(
        "feed-1",
        JobOptions::default()
            .with_priority(99)
            .scheduled_for(now + Duration::hours(1)),
    );
    repo.insert_batch(&[low.clone(), high.clone(), future])
        .await
        .unwrap();

    let candidate = repo.find_claim_candidate(now, &[]).await.unwrap().unwrap();
    assert_eq!(candidate.id, high.id);
}

#[tokio::test]
async fn test_stale_candidate_loses_claim() {
    let (_dir, db) = open_database().await;
    let repo = db.job_repository();
    let now = Utc::now();

    let job = message_job("feed-1", JobOptions::default());
    repo.insert(&job).await.unwrap();

    let candidate = repo.find_claim_candidate(now, &[]).await.unwrap().unwrap();
    let lease = now + Duration::seconds(60);

    let claimed = repo
        .try_claim(&candidate, "worker-a", now, lease)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(claimed.status, JobStatus::Locked);
    assert_eq!(claimed.worker_id.as_deref(), Some("worker-a"));

    // 同一个候选快照再次认领必须失败
    assert!(repo
        .try_claim(&candidate, "worker-b", now, lease)
        .await
        .unwrap()
        .is_none());
    assert!(repo.find_claim_candidate(now, &[]).await.unwrap().is_none());
}

#[tokio::test]
async fn test_excluded_ids_are_skipped_by_candidate_selection() {
    let (_dir, db) = open_database().await;
    let repo = db.job_repository();
    let now = Utc::now();

    let first = message_job("feed-1", JobOptions::default().with_priority(5));
    let second = message_job("feed-1", JobOptions::default());
    repo.insert_batch(&[first.clone(), second.clone()])
        .await
        .unwrap();

    let candidate = repo
        .find_claim_candidate(now, &[first.id.clone()])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(candidate.id, second.id);

    assert!(repo
        .find_claim_candidate(now, &[first.id.clone(), second.id.clone()])
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_concurrent_claims_have_single_winner() {
    let (_dir, db) = open_database().await;
    let repo: Arc<dyn JobRepository> = db.job_repository();
    let now = Utc::now();

    let job = message_job("feed-1", JobOptions::default());
    repo.insert(&job).await.unwrap();
    let candidate = repo.find_claim_candidate(now, &[]).await.unwrap().unwrap();

    let mut handles = Vec::new();
    for i in 0..8 {
        let repo = repo.clone();
        let candidate = candidate.clone();
        handles.push(tokio::spawn(async move {
            repo.try_claim(
                &candidate,
                &format!("worker-{i}"),
                now,
                now + Duration::seconds(60),
            )
            .await
            .unwrap()
        }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap().is_some() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test]
async fn test_lease_holder_writes_are_conditional() {
    let (_dir, db) = open_database().await;
    let repo = db.job_repository();
    let now = Utc::now();

    let job = message_job("feed-1", JobOptions::default());
    repo.insert(&job).await.unwrap();
    let candidate = repo.find_claim_candidate(now, &[]).await.unwrap().unwrap();
    repo.try_claim(&candidate, "worker-a", now, now + Duration::seconds(60))
        .await
        .unwrap()
        .unwrap();

    assert!(!repo
        .mark_completed(&job.id, "worker-b", None, now)
        .await
        .unwrap());
    assert!(repo.cancel(&job.id, now).await.unwrap());
    assert!(!repo
        .mark_completed(&job.id, "worker-a", None, now)
        .await
        .unwrap());

    let stored = repo.get_by_id(&job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Failed);
    assert_eq!(stored.last_error.as_deref(), Some("cancelled"));
    assert!(!repo.cancel(&job.id, now).await.unwrap());
}

#[tokio::test]
async fn test_dead_letter_requeue_and_cleanup() {
    let (_dir, db) = open_database().await;
    let repo = db.job_repository();
    let now = Utc::now();

    let job = message_job("feed-1", JobOptions::default());
    repo.insert(&job).await.unwrap();

    assert!(!repo.move_to_dead_letter(&job.id, now).await.unwrap());
    repo.cancel(&job.id, now).await.unwrap();
    assert!(repo.move_to_dead_letter(&job.id, now).await.unwrap());
    assert!(repo.requeue(&job.id, now).await.unwrap());

    let requeued = repo.get_by_id(&job.id).await.unwrap().unwrap();
    assert_eq!(requeued.status, JobStatus::Pending);
    assert_eq!(requeued.attempts, 0);

    repo.cancel(&job.id, now - Duration::days(40)).await.unwrap();
    let deleted = repo
        .delete_terminal_before(now - Duration::days(30))
        .await
        .unwrap();
    assert_eq!(deleted, 1);
}

#[tokio::test]
async fn test_list_by_entity_filters_and_limits() {
    let (_dir, db) = open_database().await;
    let repo = db.job_repository();
    let now = Utc::now();

    let jobs: Vec<NewJob> = (0..5)
        .map(|_| message_job("feed-1", JobOptions::default()))
        .collect();
    repo.insert_batch(&jobs).await.unwrap();
    repo.insert(&message_job("feed-2", JobOptions::default()))
        .await
        .unwrap();
    repo.cancel(&jobs[0].id, now).await.unwrap();

    let all = repo
        .list_by_entity("feed-1", &JobFilter::default())
        .await
        .unwrap();
    assert_eq!(all.len(), 5);

    let failed = repo
        .list_by_entity(
            "feed-1",
            &JobFilter {
                status: Some(JobStatus::Failed),
                limit: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(failed.len(), 1);

    let limited = repo
        .list_by_entity(
            "feed-1",
            &JobFilter {
                status: None,
                limit: Some(2),
            },
        )
        .await
        .unwrap();
    assert_eq!(limited.len(), 2);
}

#[tokio::test]
async fn test_rate_limit_refresh_and_increment() {
    let (_dir, db) = open_database().await;
    let repo = db.rate_limit_repository();
    let now = Utc::now();

    let mut record = RateLimitRecord::with_defaults("feed-1", ActionType::Like, now);
    record.hourly_reset_at = now - Duration::minutes(1);
    record.hourly_count = 7;
    record.daily_count = 9;
    repo.insert_if_absent(&record).await.unwrap();

    // 已存在时不覆盖
    repo.insert_if_absent(&RateLimitRecord::with_defaults("feed-1", ActionType::Like, now))
        .await
        .unwrap();

    let refreshed = repo
        .refresh("feed-1", ActionType::Like, now)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(refreshed.hourly_count, 0);
    assert_eq!(refreshed.daily_count, 9);
    assert!(refreshed.hourly_reset_at > now);

    let incremented = repo
        .increment("feed-1", ActionType::Like, now)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(incremented.hourly_count, 1);
    assert_eq!(incremented.daily_count, 10);

    assert!(repo
        .set_limits("feed-1", ActionType::Like, 20, 2, now)
        .await
        .unwrap());
    let custom = repo.get("feed-1", ActionType::Like).await.unwrap().unwrap();
    assert!(custom.custom_limits);
    assert_eq!(custom.daily_limit, 20);

    assert!(repo
        .increment("feed-2", ActionType::Like, now)
        .await
        .unwrap()
        .is_none());
}
