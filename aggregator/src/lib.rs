pub mod config;
pub mod kafka;
pub mod metrics_consts;
pub mod pipeline;
pub mod writer;
