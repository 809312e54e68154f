use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Impression,
    Click,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("event submitted with an empty event_id")]
    EmptyEventId,
    #[error("event submitted with an empty ad_id")]
    EmptyAdId,
}

/// An ad interaction event as submitted at the HTTP boundary.
/// `ts` is optional on input and defaulted at enrichment time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdEvent {
    pub event_id: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub ad_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub campaign_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub ts: Option<DateTime<Utc>>,
}

/// An ad event after boundary enrichment: `ts` is resolved and
/// `received_at` is stamped exactly once, then carried through the
/// pipeline unchanged. This is the wire format on the event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichedAdEvent {
    pub event_id: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub ad_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub campaign_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub ts: DateTime<Utc>,
    pub received_at: DateTime<Utc>,
}

impl AdEvent {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.event_id.is_empty() {
            return Err(ValidationError::EmptyEventId);
        }
        if self.ad_id.is_empty() {
            return Err(ValidationError::EmptyAdId);
        }
        Ok(())
    }

    /// Stamp `received_at` and default a missing `ts` to the ingestion time.
    pub fn enrich(self, now: DateTime<Utc>) -> Result<EnrichedAdEvent, ValidationError> {
        self.validate()?;
        Ok(EnrichedAdEvent {
            event_id: self.event_id,
            event_type: self.event_type,
            ad_id: self.ad_id,
            campaign_id: self.campaign_id,
            user_id: self.user_id,
            ts: self.ts.unwrap_or(now),
            received_at: now,
        })
    }
}

impl EnrichedAdEvent {
    /// `event_id` is the sole deduplication key, and doubles as the log
    /// partition key.
    pub fn key(&self) -> &str {
        &self.event_id
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.event_id.is_empty() {
            return Err(ValidationError::EmptyEventId);
        }
        if self.ad_id.is_empty() {
            return Err(ValidationError::EmptyAdId);
        }
        Ok(())
    }
}
