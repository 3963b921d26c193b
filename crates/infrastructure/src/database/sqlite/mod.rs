pub mod sqlite_job_repository;
pub mod sqlite_rate_limit_repository;

pub use sqlite_job_repository::SqliteJobRepository;
pub use sqlite_rate_limit_repository::SqliteRateLimitRepository;
