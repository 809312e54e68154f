pub mod api;
pub mod config;
pub mod events;
pub mod publish;
pub mod router;
pub mod server;
pub mod sink;
pub mod sinks;
pub mod time;
