use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use common_types::ValidationError;

#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestResponseCode {
    Accepted,
}

/// Returned to the caller before the event is published to the log:
/// acceptance means the payload is valid, not that it is durable yet.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestResponse {
    pub status: IngestResponseCode,
    pub event_id: String,
}

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("failed to parse request: {0}")]
    RequestParsingError(#[from] serde_json::Error),
    #[error("invalid event: {0}")]
    InvalidEvent(#[from] ValidationError),
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        (StatusCode::BAD_REQUEST, self.to_string()).into_response()
    }
}
