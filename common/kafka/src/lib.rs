pub mod config;
pub mod producer;

pub use config::{ConsumerConfig, KafkaConfig};
pub use producer::{create_kafka_producer, KafkaContext};
