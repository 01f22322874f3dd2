pub mod memory_store;
pub mod sqlite;

pub use memory_store::InMemoryTaskStore;
pub use sqlite::SqliteTaskStore;
