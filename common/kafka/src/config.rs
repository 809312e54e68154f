use envconfig::Envconfig;
use rdkafka::ClientConfig;

#[derive(Envconfig, Clone)]
pub struct KafkaConfig {
    #[envconfig(default = "localhost:9092")]
    pub kafka_hosts: String,

    #[envconfig(default = "ad-events")]
    pub kafka_topic: String,

    #[envconfig(default = "false")]
    pub kafka_tls: bool,

    #[envconfig(default = "20")]
    pub kafka_producer_linger_ms: u32, // Maximum time between producer batches during low traffic

    #[envconfig(default = "400")]
    pub kafka_producer_queue_mib: u32, // Size of the in-memory producer queue in mebibytes

    #[envconfig(default = "20000")]
    pub kafka_message_timeout_ms: u32, // Time before a single produce attempt is abandoned

    #[envconfig(default = "none")]
    pub kafka_compression_codec: String, // none, gzip, snappy, lz4, zstd
}

#[derive(Envconfig, Clone)]
pub struct ConsumerConfig {
    #[envconfig(default = "ad-aggregator")]
    pub kafka_consumer_group: String,

    // "earliest" replays the log when a new group comes up; aggregate
    // writes are idempotent so replays are safe.
    #[envconfig(default = "earliest")]
    pub kafka_consumer_offset_reset: String,
}

impl KafkaConfig {
    /// Base client config shared by producers and consumers.
    pub fn client_config(&self) -> ClientConfig {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &self.kafka_hosts)
            .set("statistics.interval.ms", "10000");

        if self.kafka_tls {
            client_config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        };
        client_config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_config_carries_brokers() {
        let config = KafkaConfig {
            kafka_hosts: "broker-1:9092,broker-2:9092".to_string(),
            kafka_topic: "ad-events".to_string(),
            kafka_tls: false,
            kafka_producer_linger_ms: 20,
            kafka_producer_queue_mib: 400,
            kafka_message_timeout_ms: 20000,
            kafka_compression_codec: "none".to_string(),
        };
        let client_config = config.client_config();
        assert_eq!(
            client_config.get("bootstrap.servers"),
            Some("broker-1:9092,broker-2:9092")
        );
        assert_eq!(client_config.get("security.protocol"), None);
    }

    #[test]
    fn client_config_enables_tls_when_asked() {
        let config = KafkaConfig {
            kafka_hosts: "broker:9092".to_string(),
            kafka_topic: "ad-events".to_string(),
            kafka_tls: true,
            kafka_producer_linger_ms: 20,
            kafka_producer_queue_mib: 400,
            kafka_message_timeout_ms: 20000,
            kafka_compression_codec: "none".to_string(),
        };
        assert_eq!(
            config.client_config().get("security.protocol"),
            Some("ssl")
        );
    }
}
