pub mod memory;
pub mod redis_store;
pub mod trait_def;

pub use memory::MemoryDedupStore;
pub use redis_store::RedisDedupStore;
pub use trait_def::{DedupError, DedupResult, DedupStore};
