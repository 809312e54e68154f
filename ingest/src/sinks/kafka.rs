use anyhow::anyhow;
use async_trait::async_trait;
use rdkafka::producer::{FutureProducer, FutureRecord};
use tracing::error;

use common_kafka::{create_kafka_producer, KafkaConfig, KafkaContext};
use health::HealthHandle;

use crate::sink::{LogSink, SinkError};

pub struct KafkaSink {
    producer: FutureProducer<KafkaContext>,
    topic: String,
}

impl KafkaSink {
    pub async fn new(config: &KafkaConfig, liveness: HealthHandle) -> anyhow::Result<KafkaSink> {
        let producer = create_kafka_producer(config, liveness).await?;
        Ok(KafkaSink {
            producer,
            topic: config.kafka_topic.clone(),
        })
    }
}

#[async_trait]
impl LogSink for KafkaSink {
    async fn append(&self, key: &str, payload: &[u8]) -> Result<(), SinkError> {
        let delivery = self
            .producer
            .send_result(FutureRecord {
                topic: self.topic.as_str(),
                payload: Some(payload),
                partition: None,
                key: Some(key),
                timestamp: None,
                headers: None,
            })
            .map_err(|(err, _)| {
                error!("failed to enqueue event for production: {}", err);
                SinkError::Append(anyhow!("failed to enqueue event: {err}"))
            })?;

        match delivery.await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err((err, _))) => {
                error!("failed to produce event: {}", err);
                Err(SinkError::Append(anyhow!(
                    "failed to produce to kafka: {err}"
                )))
            }
            Err(_) => {
                // Cancelled: message.timeout.ms elapsed while librdkafka
                // was still retrying internally
                error!("failed to produce event before write timeout");
                Err(SinkError::Append(anyhow!(
                    "produce abandoned before broker acknowledgment"
                )))
            }
        }
    }
}
