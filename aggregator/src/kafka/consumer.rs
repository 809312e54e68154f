use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use metrics::counter;
use rdkafka::consumer::{BaseConsumer, CommitMode, Consumer, ConsumerContext, Rebalance};
use rdkafka::consumer::StreamConsumer;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::{ClientContext, Message, Offset, TopicPartitionList};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use common_kafka::{ConsumerConfig, KafkaConfig};
use health::HealthHandle;

use crate::metrics_consts::KAFKA_CONSUMER_ERRORS;

/// One consumed log message, detached from the rdkafka borrow so the
/// batch can outlive the poll that produced it.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub partition: i32,
    pub offset: i64,
    pub payload: Option<Vec<u8>>,
}

#[derive(Error, Debug)]
pub enum ConsumerError {
    #[error("kafka error: {0}")]
    Kafka(#[from] KafkaError),
}

/// Checkpointing capabilities of the batch loop, kept as distinct
/// operations on purpose:
///   - `resolve` tracks logical progress past a message, in memory only,
///   - `heartbeat` proves the loop is alive,
///   - `commit` durably advances the group checkpoint to the resolved
///     positions,
///   - `rewind` repositions the consumer at the start of the batch so an
///     uncommitted batch is redelivered by the next fetch.
/// Collapsing them would make it impossible to skip malformed messages
/// cheaply while still replaying the whole batch after a failed storage
/// transaction.
pub trait BatchControl: Send + Sync {
    fn resolve(&self, message: &RawMessage);
    fn heartbeat(&self);
    fn commit(&self) -> Result<(), ConsumerError>;
    fn rewind(&self) -> Result<(), ConsumerError>;
    /// False once shutdown was requested or the partition assignment
    /// changed under the batch.
    fn is_active(&self) -> bool;
}

/// Bumps an assignment generation on every revocation, so batches
/// fetched under a previous assignment can detect they went stale.
pub struct AggregatorContext {
    generation: Arc<AtomicU64>,
}

impl ClientContext for AggregatorContext {}

impl ConsumerContext for AggregatorContext {
    fn pre_rebalance(&self, _base_consumer: &BaseConsumer<Self>, rebalance: &Rebalance) {
        match rebalance {
            Rebalance::Revoke(partitions) => {
                if partitions.count() == 0 {
                    // Cooperative-sticky no-op, nothing actually moved
                    return;
                }
                info!("revoking {} partitions", partitions.count());
                self.generation.fetch_add(1, Ordering::SeqCst);
            }
            Rebalance::Assign(partitions) => {
                info!("assigned {} partitions", partitions.count());
            }
            Rebalance::Error(err) => {
                warn!("rebalance error: {}", err);
            }
        }
    }
}

pub struct BatchConsumer {
    consumer: Arc<StreamConsumer<AggregatorContext>>,
    generation: Arc<AtomicU64>,
    topic: String,
    liveness: HealthHandle,
    shutdown: CancellationToken,
}

impl BatchConsumer {
    pub fn new(
        kafka: &KafkaConfig,
        consumer_config: &ConsumerConfig,
        liveness: HealthHandle,
        shutdown: CancellationToken,
    ) -> Result<Self, KafkaError> {
        let generation = Arc::new(AtomicU64::new(0));

        let mut client_config = kafka.client_config();
        client_config
            .set("group.id", &consumer_config.kafka_consumer_group)
            .set(
                "auto.offset.reset",
                &consumer_config.kafka_consumer_offset_reset,
            )
            // Progress is tracked per batch and committed explicitly;
            // nothing may advance the checkpoint behind the loop's back.
            .set("enable.auto.offset.store", "false")
            .set("enable.auto.commit", "false");

        let consumer: StreamConsumer<AggregatorContext> =
            client_config.create_with_context(AggregatorContext {
                generation: generation.clone(),
            })?;
        consumer.subscribe(&[kafka.kafka_topic.as_str()])?;

        Ok(Self {
            consumer: Arc::new(consumer),
            generation,
            topic: kafka.kafka_topic.clone(),
            liveness,
            shutdown,
        })
    }

    /// Collect up to `max_size` messages, waiting at most `timeout`.
    /// Returns the batch with a control handle pinned to the partition
    /// assignment generation observed before the first poll, so a
    /// rebalance at any point during collection marks the batch stale.
    pub async fn fetch_batch(
        &self,
        max_size: usize,
        timeout: Duration,
    ) -> Result<(Vec<RawMessage>, BatchHandle), ConsumerError> {
        let fetched_at_generation = self.generation.load(Ordering::SeqCst);
        let mut messages = Vec::new();
        let mut batch_start: HashMap<i32, i64> = HashMap::new();
        let mut stream = self.consumer.stream();
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = &mut deadline => break,
                _ = self.shutdown.cancelled() => break,
                next = stream.next() => match next {
                    Some(Ok(message)) => {
                        batch_start
                            .entry(message.partition())
                            .or_insert(message.offset());
                        messages.push(RawMessage {
                            partition: message.partition(),
                            offset: message.offset(),
                            payload: message.payload().map(|p| p.to_vec()),
                        });
                        if messages.len() >= max_size {
                            break;
                        }
                    }
                    Some(Err(KafkaError::MessageConsumptionFatal(code))) => {
                        return Err(KafkaError::MessageConsumptionFatal(code).into());
                    }
                    Some(Err(err)) => {
                        warn!("kafka consumer error: {err}");
                        counter!(KAFKA_CONSUMER_ERRORS).increment(1);
                    }
                    None => break,
                }
            }
        }

        let handle = BatchHandle {
            consumer: self.consumer.clone(),
            generation: self.generation.clone(),
            fetched_at_generation,
            topic: self.topic.clone(),
            liveness: self.liveness.clone(),
            shutdown: self.shutdown.clone(),
            batch_start,
            resolved: Mutex::new(HashMap::new()),
        };
        Ok((messages, handle))
    }
}

/// Per-batch view onto the consumer. Resolved positions live in this
/// handle until `commit` turns them into the group checkpoint; dropping
/// the handle without committing leaves the checkpoint untouched.
pub struct BatchHandle {
    consumer: Arc<StreamConsumer<AggregatorContext>>,
    generation: Arc<AtomicU64>,
    fetched_at_generation: u64,
    topic: String,
    liveness: HealthHandle,
    shutdown: CancellationToken,
    /// Lowest fetched offset per partition, the rewind target.
    batch_start: HashMap<i32, i64>,
    /// Next offset to consume per partition, per the resolves so far.
    resolved: Mutex<HashMap<i32, i64>>,
}

impl BatchHandle {
    fn is_stale(&self) -> bool {
        self.generation.load(Ordering::SeqCst) != self.fetched_at_generation
    }
}

impl BatchControl for BatchHandle {
    fn resolve(&self, message: &RawMessage) {
        let next_offset = message.offset + 1;
        let mut resolved = self.resolved.lock().unwrap_or_else(|e| e.into_inner());
        let entry = resolved.entry(message.partition).or_insert(next_offset);
        *entry = (*entry).max(next_offset);
    }

    fn heartbeat(&self) {
        self.liveness.report_healthy();
    }

    fn commit(&self) -> Result<(), ConsumerError> {
        if self.is_stale() {
            // The partitions moved to another consumer mid-batch; it
            // will reprocess them, committing here would race it.
            warn!("assignment changed under batch, abandoning checkpoint");
            return Ok(());
        }

        let resolved = self
            .resolved
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if resolved.is_empty() {
            return Ok(());
        }

        let mut positions = TopicPartitionList::new();
        for (partition, next_offset) in &resolved {
            positions.add_partition_offset(&self.topic, *partition, Offset::Offset(*next_offset))?;
        }
        match self.consumer.commit(&positions, CommitMode::Sync) {
            Ok(()) => Ok(()),
            // Nothing newer than the current checkpoint, not a failure
            Err(KafkaError::ConsumerCommit(RDKafkaErrorCode::NoOffset)) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn rewind(&self) -> Result<(), ConsumerError> {
        for (partition, start_offset) in &self.batch_start {
            self.consumer.seek(
                &self.topic,
                *partition,
                Offset::Offset(*start_offset),
                Duration::from_secs(5),
            )?;
        }
        Ok(())
    }

    fn is_active(&self) -> bool {
        !self.shutdown.is_cancelled() && !self.is_stale()
    }
}
