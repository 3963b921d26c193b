use std::{str::FromStr, sync::Arc, time::Duration};

use feedq_core::{
    config::DatabaseConfig,
    traits::{JobRepository, RateLimitRepository},
    QueueResult,
};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    SqlitePool,
};
use tracing::{debug, info};

use super::{
    schema,
    sqlite::{SqliteJobRepository, SqliteRateLimitRepository},
};

/// 数据库句柄
///
/// 持有SQLite连接池，负责打开、迁移与关闭，并作为仓库的工厂。
/// 多个进程可以通过WAL模式共享同一个数据库文件。
pub struct DatabaseManager {
    pool: SqlitePool,
}

impl DatabaseManager {
    /// 按配置打开数据库（文件不存在时创建）
    pub async fn new(config: &DatabaseConfig) -> QueueResult<Self> {
        let connect_options = SqliteConnectOptions::from_str(&config.url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(config.busy_timeout_seconds));

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds))
            .idle_timeout(Duration::from_secs(config.idle_timeout_seconds))
            .connect_with(connect_options)
            .await?;

        info!(url = %config.url, max_connections = config.max_connections, "Database opened");
        Ok(Self { pool })
    }

    /// 打开数据库并执行迁移
    pub async fn open(config: &DatabaseConfig) -> QueueResult<Self> {
        let manager = Self::new(config).await?;
        manager.migrate().await?;
        Ok(manager)
    }

    pub async fn migrate(&self) -> QueueResult<()> {
        schema::run_migrations(&self.pool).await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn health_check(&self) -> QueueResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        debug!("Closing database pool");
        self.pool.close().await
    }

    pub fn job_repository(&self) -> Arc<dyn JobRepository> {
        Arc::new(SqliteJobRepository::new(self.pool.clone()))
    }

    pub fn rate_limit_repository(&self) -> Arc<dyn RateLimitRepository> {
        Arc::new(SqliteRateLimitRepository::new(self.pool.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_config(dir: &tempfile::TempDir) -> DatabaseConfig {
        DatabaseConfig {
            url: format!("sqlite:{}", dir.path().join("feedq.db").display()),
            ..DatabaseConfig::default()
        }
    }

    #[tokio::test]
    async fn test_open_creates_schema() {
        let dir = tempfile::tempdir().unwrap();
        let manager = DatabaseManager::open(&file_config(&dir)).await.unwrap();

        assert!(manager.health_check().await.is_ok());

        let tables: Vec<(String,)> =
            sqlx::query_as("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
                .fetch_all(manager.pool())
                .await
                .unwrap();
        let names: Vec<&str> = tables.iter().map(|(name,)| name.as_str()).collect();
        assert!(names.contains(&"jobs"));
        assert!(names.contains(&"rate_limits"));

        manager.close().await;
    }

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let manager = DatabaseManager::open(&file_config(&dir)).await.unwrap();
        assert!(manager.migrate().await.is_ok());
        manager.close().await;

        // 重新打开同一个文件
        let reopened = DatabaseManager::open(&file_config(&dir)).await.unwrap();
        assert!(reopened.health_check().await.is_ok());
        reopened.close().await;
    }
}
