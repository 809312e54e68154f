use std::time::Duration;

use metrics::counter;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use common_types::EnrichedAdEvent;

use crate::config::Config;
use crate::kafka::consumer::{BatchConsumer, BatchControl, ConsumerError, RawMessage};
use crate::metrics_consts::{
    BATCHES_FAILED, BATCHES_PROCESSED, EVENTS_DEDUPED, EVENTS_PROCESSED, EVENTS_RECEIVED,
    EVENTS_SKIPPED,
};
use crate::writer::{AggregateWriter, WriteError};

#[derive(Error, Debug)]
pub enum BatchError {
    #[error(transparent)]
    Consumer(#[from] ConsumerError),
    #[error(transparent)]
    Write(#[from] WriteError),
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub received: usize,
    pub skipped: usize,
    pub processed: usize,
    pub deduped: usize,
}

pub struct PipelineConfig {
    pub batch_size: usize,
    pub batch_timeout: Duration,
    pub heartbeat_interval: usize,
    pub failure_backoff_base: Duration,
    pub failure_backoff_max: Duration,
}

impl From<&Config> for PipelineConfig {
    fn from(config: &Config) -> Self {
        Self {
            batch_size: config.batch_size,
            batch_timeout: Duration::from_millis(config.batch_timeout_ms),
            heartbeat_interval: config.heartbeat_interval.max(1),
            failure_backoff_base: Duration::from_millis(config.failure_backoff_base_ms),
            failure_backoff_max: Duration::from_millis(config.failure_backoff_max_ms),
        }
    }
}

/// Filter one fetched batch down to valid events, hand them to the
/// writer, and commit the checkpoint only if the write succeeded.
///
/// Malformed and schema-invalid messages are resolved and dropped so
/// they are never redelivered. Valid messages are resolved too, but
/// resolves are in-memory bookkeeping on the batch handle: the durable
/// checkpoint only moves on commit. A failed storage transaction rewinds
/// the consumer to the start of the batch instead, so the whole batch
/// comes back on the next fetch and the seen-set makes the replay
/// harmless.
pub async fn process_batch(
    messages: &[RawMessage],
    control: &dyn BatchControl,
    writer: &dyn AggregateWriter,
    heartbeat_interval: usize,
) -> Result<BatchSummary, BatchError> {
    let heartbeat_interval = heartbeat_interval.max(1);
    let mut summary = BatchSummary {
        received: messages.len(),
        ..Default::default()
    };
    let mut events = Vec::with_capacity(messages.len());

    for message in messages {
        if !control.is_active() {
            // Assignment changed or shutdown began: these partitions
            // belong to someone else now, stop touching their offsets.
            return Ok(summary);
        }

        let Some(payload) = message.payload.as_deref() else {
            summary.skipped += 1;
            control.resolve(message);
            continue;
        };

        match serde_json::from_slice::<EnrichedAdEvent>(payload) {
            Ok(event) => match event.validate() {
                Ok(()) => {
                    events.push(event);
                    control.resolve(message);
                    if events.len() % heartbeat_interval == 0 {
                        control.heartbeat();
                    }
                }
                Err(err) => {
                    warn!(
                        partition = message.partition,
                        offset = message.offset,
                        "dropping invalid event: {err}"
                    );
                    summary.skipped += 1;
                    control.resolve(message);
                }
            },
            Err(err) => {
                warn!(
                    partition = message.partition,
                    offset = message.offset,
                    "dropping undecodable message: {err}"
                );
                summary.skipped += 1;
                control.resolve(message);
            }
        }
    }

    counter!(EVENTS_RECEIVED).increment(summary.received as u64);
    counter!(EVENTS_SKIPPED).increment(summary.skipped as u64);

    if events.is_empty() {
        control.commit()?;
        control.heartbeat();
        return Ok(summary);
    }

    match writer.write_batch(&events).await {
        Ok(outcome) => {
            summary.processed = outcome.processed;
            summary.deduped = outcome.deduped;
            counter!(EVENTS_PROCESSED).increment(outcome.processed as u64);
            counter!(EVENTS_DEDUPED).increment(outcome.deduped as u64);
            info!(
                received = summary.received,
                skipped = summary.skipped,
                processed = outcome.processed,
                deduped = outcome.deduped,
                "batch written"
            );
            control.commit()?;
            control.heartbeat();
            Ok(summary)
        }
        Err(err) => {
            // No commit; rewind so the next fetch redelivers the whole
            // batch. If the seek itself fails (e.g. the partitions were
            // revoked), redelivery falls to the rebalance instead.
            error!("batch write failed, checkpoint not advanced: {err}");
            if let Err(seek_err) = control.rewind() {
                warn!("failed to rewind failed batch: {seek_err}");
            }
            control.heartbeat();
            Err(err.into())
        }
    }
}

/// Outer consume loop: fetch, process, pause on storage failure with a
/// capped exponential backoff that resets after any successful batch.
pub async fn run(
    consumer: BatchConsumer,
    writer: &dyn AggregateWriter,
    config: PipelineConfig,
    shutdown: CancellationToken,
) -> Result<(), BatchError> {
    let mut failure_backoff = config.failure_backoff_base;

    loop {
        if shutdown.is_cancelled() {
            info!("shutdown requested, stopping batch loop");
            return Ok(());
        }

        let (messages, handle) = consumer
            .fetch_batch(config.batch_size, config.batch_timeout)
            .await?;

        match process_batch(&messages, &handle, writer, config.heartbeat_interval).await {
            Ok(_) => {
                counter!(BATCHES_PROCESSED).increment(1);
                failure_backoff = config.failure_backoff_base;
            }
            Err(BatchError::Write(err)) => {
                counter!(BATCHES_FAILED).increment(1);
                warn!(
                    "pausing {:?} before refetching failed batch: {err}",
                    failure_backoff
                );
                tokio::select! {
                    _ = tokio::time::sleep(failure_backoff) => {}
                    _ = shutdown.cancelled() => {}
                }
                failure_backoff = (failure_backoff * 2).min(config.failure_backoff_max);
            }
            Err(err @ BatchError::Consumer(_)) => return Err(err),
        }
    }
}
