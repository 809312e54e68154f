use std::future::ready;
use std::time::Duration;

use axum::routing::get;
use axum::Router;
use envconfig::Envconfig;
use metrics_exporter_prometheus::PrometheusBuilder;
use sqlx::postgres::PgPoolOptions;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use aggregator::config::Config;
use aggregator::kafka::consumer::BatchConsumer;
use aggregator::pipeline::{self, PipelineConfig};
use aggregator::writer::PgAggregateWriter;
use health::HealthRegistry;

fn setup_tracing() {
    let log_layer = tracing_subscriber::fmt::layer().with_filter(EnvFilter::from_default_env());
    tracing_subscriber::registry().with(log_layer).init();
}

async fn index() -> &'static str {
    "ad event aggregator"
}

fn start_liveness_server(config: &Config, liveness: HealthRegistry) -> JoinHandle<()> {
    let recorder_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install prometheus recorder");

    let router = Router::new()
        .route("/", get(index))
        .route("/_readiness", get(index))
        .route("/_liveness", get(move || ready(liveness.get_status())))
        .route("/metrics", get(move || ready(recorder_handle.render())));

    let bind = format!("{}:{}", config.host, config.port);
    tokio::task::spawn(async move {
        let listener = tokio::net::TcpListener::bind(&bind)
            .await
            .expect("failed to bind liveness server");
        axum::serve(listener, router)
            .await
            .expect("failed to serve liveness server");
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    setup_tracing();

    let config = Config::init_from_env().expect("failed to load configuration from env");
    let liveness = HealthRegistry::new("liveness");

    let pool = PgPoolOptions::new()
        .max_connections(config.max_pg_connections)
        .connect(&config.database_url)
        .await?;
    let writer = PgAggregateWriter::new(pool, config.upsert_chunk_size);

    let shutdown = CancellationToken::new();
    let batch_loop_liveness = liveness.register("batch_loop", Duration::from_secs(60));
    let consumer = BatchConsumer::new(
        &config.kafka,
        &config.consumer,
        batch_loop_liveness,
        shutdown.clone(),
    )?;

    start_liveness_server(&config, liveness);

    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
        info!("shutting down gracefully");
        signal_shutdown.cancel();
    });

    let pipeline_config = PipelineConfig::from(&config);
    pipeline::run(consumer, &writer, pipeline_config, shutdown).await?;

    Ok(())
}
