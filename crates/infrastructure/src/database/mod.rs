pub mod manager;
pub mod mapping;
pub mod schema;
pub mod sqlite;

pub use manager::DatabaseManager;
pub use mapping::MappingHelpers;
pub use sqlite::{SqliteJobRepository, SqliteRateLimitRepository};
