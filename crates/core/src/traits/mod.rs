pub mod repository;
pub mod social_api;

pub use repository::*;
pub use social_api::*;
