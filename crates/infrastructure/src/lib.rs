pub mod database;
pub mod observability;

pub use database::*;
pub use observability::{init_logging, init_metrics};
