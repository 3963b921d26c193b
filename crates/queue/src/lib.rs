//! 队列语义层
//!
//! 在 `feedq-core` 的仓库接口之上实现任务存储（认领、租约、重试）、
//! 按实体的日/小时限流，以及终态任务的定期清理。

pub mod cleanup;
pub mod job_store;
pub mod rate_limiter;
pub mod retry_policy;

pub use cleanup::RetentionSweeper;
pub use job_store::JobStore;
pub use rate_limiter::RateLimiter;
pub use retry_policy::RetryPolicy;
