pub mod api_observability;
pub mod app_config;
pub mod database;
pub mod queue;
pub mod worker;

// Re-export main types for easier imports
pub use api_observability::{ApiConfig, ObservabilityConfig};
pub use app_config::{AppConfig, DEFAULT_CONFIG_PATHS};
pub use database::DatabaseConfig;
pub use queue::{QueueConfig, RateLimitConfig, RetryConfig, RetryStrategy};
pub use worker::WorkerConfig;
