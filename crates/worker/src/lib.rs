//! # feedq-worker
//!
//! 执行侧：Worker池认领任务，[`JobProcessor`] 按负载类型分派到处理器，
//! 处理器通过 [`feedq_core::SocialApi`] 调用第三方平台并维护限流计数。

pub mod graph_client;
pub mod handlers;
pub mod processor;
pub mod worker_pool;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use graph_client::GraphApiClient;
pub use handlers::PublishSettings;
pub use processor::{HandlerOutcome, JobExecutor, JobProcessor};
pub use worker_pool::{default_worker_id, PoolStatus, WorkerPool};
