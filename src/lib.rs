pub mod config;
pub mod dedup;
pub mod logging;
pub mod models;
pub mod pipeline;
pub mod sink;
