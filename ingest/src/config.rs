use std::net::SocketAddr;

use envconfig::Envconfig;

use common_kafka::KafkaConfig;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(default = "127.0.0.1:3000")]
    pub address: SocketAddr,

    #[envconfig(default = "false")]
    pub print_sink: bool,

    #[envconfig(default = "true")]
    pub export_prometheus: bool,

    #[envconfig(nested = true)]
    pub kafka: KafkaConfig,

    #[envconfig(default = "5")]
    pub publish_retries: u32,

    #[envconfig(default = "50")]
    pub publish_base_delay_ms: u64,

    #[envconfig(default = "1000")]
    pub publish_max_delay_ms: u64,
}
