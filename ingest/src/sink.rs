use async_trait::async_trait;
use metrics::counter;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("failed to append to log: {0}")]
    Append(#[source] anyhow::Error),
}

/// Append-only handle to the durable event log.
///
/// One call is one single, independent append attempt. There is no
/// producer-side dedup: a retried append after a lost acknowledgment may
/// duplicate on the log, and the consumer filters those out.
#[async_trait]
pub trait LogSink: Send + Sync {
    async fn append(&self, key: &str, payload: &[u8]) -> Result<(), SinkError>;
}

/// Local development sink that drops events on the floor after logging.
pub struct PrintSink {}

#[async_trait]
impl LogSink for PrintSink {
    async fn append(&self, key: &str, _payload: &[u8]) -> Result<(), SinkError> {
        info!("appended event {}", key);
        counter!("ingest_events_appended_total").increment(1);
        Ok(())
    }
}
