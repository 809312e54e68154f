use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use bytes::Bytes;
use metrics::counter;
use tracing::{error, instrument};

use common_types::AdEvent;

use crate::api::{IngestError, IngestResponse, IngestResponseCode};
use crate::publish::publish_with_retry;
use crate::router::AppState;

/// POST /events
///
/// Validates and enriches the payload, acknowledges the caller with 202,
/// and publishes to the log on a detached task. The caller never waits on
/// broker availability; exhausted publishes only surface in logs.
#[instrument(skip_all, fields(event_id))]
pub async fn event(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<IngestResponse>), IngestError> {
    let event: AdEvent = serde_json::from_slice(&body)?;
    let enriched = event.enrich(state.timesource.now())?;
    tracing::Span::current().record("event_id", enriched.event_id.as_str());
    counter!("ingest_events_accepted_total").increment(1);

    let response = IngestResponse {
        status: IngestResponseCode::Accepted,
        event_id: enriched.event_id.clone(),
    };

    let sink = state.sink.clone();
    let policy = state.retry_policy.clone();
    tokio::spawn(async move {
        if let Err(err) = publish_with_retry(sink.as_ref(), &enriched, &policy).await {
            error!(
                event_id = %enriched.event_id,
                "failed to publish event to kafka after retries: {err}"
            );
        }
    });

    Ok((StatusCode::ACCEPTED, Json(response)))
}
