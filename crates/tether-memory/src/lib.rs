pub mod kv;
pub mod sqlite;
pub mod state_store;

pub use kv::InMemoryStore;
pub use sqlite::SqliteKvStore;
pub use state_store::StateStore;
