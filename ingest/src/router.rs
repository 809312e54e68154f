use std::future::ready;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusBuilder;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use health::HealthRegistry;

use crate::events;
use crate::publish::RetryPolicy;
use crate::sink::LogSink;
use crate::time::TimeSource;

#[derive(Clone)]
pub struct AppState {
    pub sink: Arc<dyn LogSink>,
    pub timesource: Arc<dyn TimeSource + Send + Sync>,
    pub retry_policy: Arc<RetryPolicy>,
}

async fn index() -> &'static str {
    "ad event ingestion"
}

pub fn router<TZ, S>(
    timesource: TZ,
    sink: S,
    liveness: HealthRegistry,
    retry_policy: RetryPolicy,
    metrics: bool,
) -> Router
where
    TZ: TimeSource + Send + Sync + 'static,
    S: LogSink + 'static,
{
    let state = AppState {
        sink: Arc::new(sink),
        timesource: Arc::new(timesource),
        retry_policy: Arc::new(retry_policy),
    };

    let router = Router::new()
        .route("/", get(index))
        .route("/events", post(events::event))
        .route("/health", get(move || ready(liveness.get_status())))
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(1024 * 1024))
        .with_state(state);

    // Don't install a global recorder when the router is built from
    // tests, installing twice panics.
    if metrics {
        let recorder_handle = PrometheusBuilder::new()
            .install_recorder()
            .expect("failed to install prometheus recorder");
        router.route("/metrics", get(move || ready(recorder_handle.render())))
    } else {
        router
    }
}
