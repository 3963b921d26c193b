use feedq_core::QueueResult;
use sqlx::SqlitePool;
use tracing::debug;

const CREATE_JOBS: &str = r#"
    CREATE TABLE IF NOT EXISTS jobs (
        id TEXT PRIMARY KEY,
        queue_name TEXT NOT NULL DEFAULT 'default',
        job_type TEXT NOT NULL,
        entity_id TEXT NOT NULL,
        payload TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'PENDING',
        priority INTEGER NOT NULL DEFAULT 0,
        scheduled_for INTEGER,
        attempts INTEGER NOT NULL DEFAULT 0,
        max_attempts INTEGER NOT NULL DEFAULT 3,
        last_error TEXT,
        result TEXT,
        worker_id TEXT,
        locked_at INTEGER,
        lock_expiry INTEGER,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        processed_at INTEGER,
        completed_at INTEGER
    )
"#;

const CREATE_RATE_LIMITS: &str = r#"
    CREATE TABLE IF NOT EXISTS rate_limits (
        entity_id TEXT NOT NULL,
        action_type TEXT NOT NULL,
        daily_limit INTEGER NOT NULL,
        daily_count INTEGER NOT NULL DEFAULT 0 CHECK (daily_count >= 0),
        daily_reset_at INTEGER NOT NULL,
        hourly_limit INTEGER NOT NULL,
        hourly_count INTEGER NOT NULL DEFAULT 0 CHECK (hourly_count >= 0),
        hourly_reset_at INTEGER NOT NULL,
        blocked_until INTEGER,
        block_reason TEXT,
        custom_limits INTEGER NOT NULL DEFAULT 0,
        updated_at INTEGER NOT NULL,
        PRIMARY KEY (entity_id, action_type)
    )
"#;

const INDEXES: [&str; 3] = [
    "CREATE INDEX IF NOT EXISTS idx_jobs_claim ON jobs(status, priority DESC, scheduled_for, created_at)",
    "CREATE INDEX IF NOT EXISTS idx_jobs_entity ON jobs(entity_id, created_at DESC)",
    "CREATE INDEX IF NOT EXISTS idx_jobs_status_updated ON jobs(status, updated_at)",
];

/// 建表与索引，可重复执行
pub async fn run_migrations(pool: &SqlitePool) -> QueueResult<()> {
    debug!("Running SQLite database migrations");

    sqlx::query(CREATE_JOBS).execute(pool).await?;
    sqlx::query(CREATE_RATE_LIMITS).execute(pool).await?;
    for index_sql in INDEXES {
        sqlx::query(index_sql).execute(pool).await?;
    }

    debug!("Successfully completed SQLite database migrations");
    Ok(())
}
