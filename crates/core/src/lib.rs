pub mod config;
pub mod errors;
pub mod models;
pub mod traits;

pub use config::*;
pub use errors::*;
pub use traits::{
    ApiError, ContainerRequest, ContainerStatus, JobRepository, RateLimitRepository, SocialApi,
};
