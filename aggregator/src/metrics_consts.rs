pub const EVENTS_RECEIVED: &str = "aggregator_events_received";
pub const EVENTS_SKIPPED: &str = "aggregator_events_skipped";
pub const EVENTS_PROCESSED: &str = "aggregator_events_processed";
pub const EVENTS_DEDUPED: &str = "aggregator_events_deduped";
pub const BATCHES_PROCESSED: &str = "aggregator_batches_processed";
pub const BATCHES_FAILED: &str = "aggregator_batches_failed";
pub const KAFKA_CONSUMER_ERRORS: &str = "aggregator_kafka_consumer_errors";
