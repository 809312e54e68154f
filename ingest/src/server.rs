use std::future::Future;
use std::time::Duration;

use tokio::net::TcpListener;

use health::HealthRegistry;

use crate::config::Config;
use crate::publish::RetryPolicy;
use crate::router;
use crate::sink::PrintSink;
use crate::sinks::kafka::KafkaSink;
use crate::time::SystemTime;

pub async fn serve<F>(config: Config, listener: TcpListener, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let liveness = HealthRegistry::new("liveness");
    let retry_policy = RetryPolicy {
        retries: config.publish_retries,
        base_delay: Duration::from_millis(config.publish_base_delay_ms),
        max_delay: Duration::from_millis(config.publish_max_delay_ms),
    };

    let app = if config.print_sink {
        // Local development: no broker, so mark the sink healthy once.
        let handle = liveness.register("print_sink", Duration::from_secs(60 * 60 * 24));
        handle.report_healthy();
        router::router(
            SystemTime {},
            PrintSink {},
            liveness,
            retry_policy,
            config.export_prometheus,
        )
    } else {
        let handle = liveness.register("rdkafka", Duration::from_secs(30));
        let sink = KafkaSink::new(&config.kafka, handle).await?;
        router::router(
            SystemTime {},
            sink,
            liveness,
            retry_policy,
            config.export_prometheus,
        )
    };

    tracing::info!("listening on {:?}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}
