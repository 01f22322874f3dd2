pub mod database;
pub mod in_memory_queue;
pub mod observability;

pub use database::{InMemoryTaskStore, SqliteTaskStore};
pub use in_memory_queue::BoundedTaskQueue;
pub use observability::{init_logging, init_logging_from_config};
