pub mod db;
pub mod local_store;

pub use local_store::{LocalStore, MemoryStore, SqliteStore};
