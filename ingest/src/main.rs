use envconfig::Envconfig;
use tracing_subscriber::EnvFilter;

use ingest::config::Config;
use ingest::server::serve;

async fn shutdown() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install SIGINT handler");
    tracing::info!("shutting down gracefully");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::init_from_env().expect("failed to load configuration from env");
    let listener = tokio::net::TcpListener::bind(config.address).await?;

    serve(config, listener, shutdown()).await
}
