pub mod log_sink;
pub mod memory;
pub mod trait_def;

pub use log_sink::LogSink;
pub use memory::{MemorySink, SinkKey};
pub use trait_def::{SinkError, SinkResult, StorageSink};
