use std::time::Duration;

use metrics::counter;
use rand::Rng;
use thiserror::Error;
use tracing::warn;

use common_types::EnrichedAdEvent;

use crate::sink::{LogSink, SinkError};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Additional attempts after the first one.
    pub retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 5,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    pub fn total_attempts(&self) -> u32 {
        self.retries + 1
    }

    /// Delay before attempt `attempt` (1-based, so only called for
    /// attempt >= 2): exponential, capped at `max_delay`, then widened by
    /// up to +20% random jitter. Jitter is only ever added, so the
    /// exponential floor holds while concurrent callers spread out
    /// instead of retrying in lockstep.
    fn backoff(&self, attempt: u32) -> Duration {
        let shift = (attempt - 2).min(16);
        let exp = self.base_delay.saturating_mul(1 << shift);
        let delay = exp.min(self.max_delay);
        delay + delay.mul_f64(rand::thread_rng().gen_range(0.0..0.2))
    }
}

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("failed to serialize event: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("publish exhausted after {attempts} attempts: {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: SinkError,
    },
}

/// Append one enriched event to the durable log, retrying transient
/// failures with capped exponential backoff. Each attempt is a single
/// independent append keyed by `event_id`; duplicates produced by a
/// retry after a lost acknowledgment are filtered on the consumer side.
pub async fn publish_with_retry(
    sink: &dyn LogSink,
    event: &EnrichedAdEvent,
    policy: &RetryPolicy,
) -> Result<(), PublishError> {
    let payload = serde_json::to_vec(event)?;
    let max_attempts = policy.total_attempts();
    let mut last_err = None;

    for attempt in 1..=max_attempts {
        if attempt > 1 {
            tokio::time::sleep(policy.backoff(attempt)).await;
        }

        counter!("ingest_publish_attempts_total").increment(1);
        match sink.append(event.key(), &payload).await {
            Ok(()) => {
                counter!("ingest_events_published_total").increment(1);
                return Ok(());
            }
            Err(err) => {
                warn!(
                    event_id = %event.event_id,
                    attempt,
                    "publish attempt failed: {err}"
                );
                last_err = Some(err);
            }
        }
    }

    counter!("ingest_publish_exhausted_total").increment(1);
    Err(PublishError::Exhausted {
        attempts: max_attempts,
        source: last_err.expect("at least one attempt was made"),
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use anyhow::anyhow;
    use async_trait::async_trait;
    use chrono::Utc;
    use tokio::time::Instant;

    use common_types::{AdEvent, EnrichedAdEvent, EventType};

    use super::*;

    struct FlakySink {
        failures_left: AtomicU32,
        attempts: Mutex<Vec<Instant>>,
    }

    impl FlakySink {
        fn failing(times: u32) -> Self {
            Self {
                failures_left: AtomicU32::new(times),
                attempts: Mutex::new(Vec::new()),
            }
        }

        fn attempt_times(&self) -> Vec<Instant> {
            self.attempts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LogSink for FlakySink {
        async fn append(&self, _key: &str, _payload: &[u8]) -> Result<(), SinkError> {
            self.attempts.lock().unwrap().push(Instant::now());
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(SinkError::Append(anyhow!("broker unavailable")));
            }
            Ok(())
        }
    }

    fn test_event() -> EnrichedAdEvent {
        AdEvent {
            event_id: "e1".to_string(),
            event_type: EventType::Impression,
            ad_id: "ad_123".to_string(),
            campaign_id: None,
            user_id: None,
            ts: None,
        }
        .enrich(Utc::now())
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_doubles_with_bounded_jitter() {
        let sink = FlakySink::failing(2);
        let policy = RetryPolicy::default();

        publish_with_retry(&sink, &test_event(), &policy)
            .await
            .expect("publish should succeed on the third attempt");

        let times = sink.attempt_times();
        assert_eq!(times.len(), 3);

        // Before attempt 2: base..base*1.2; before attempt 3: doubled.
        let first_gap = times[1] - times[0];
        assert!(first_gap >= Duration::from_millis(50), "{first_gap:?}");
        assert!(first_gap <= Duration::from_millis(60), "{first_gap:?}");

        let second_gap = times[2] - times[1];
        assert!(second_gap >= Duration::from_millis(100), "{second_gap:?}");
        assert!(second_gap <= Duration::from_millis(120), "{second_gap:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_is_clamped_at_max_delay() {
        let sink = FlakySink::failing(u32::MAX);
        let policy = RetryPolicy {
            retries: 4,
            base_delay: Duration::from_millis(300),
            max_delay: Duration::from_millis(1000),
        };

        let _unused = publish_with_retry(&sink, &test_event(), &policy).await;

        let times = sink.attempt_times();
        assert_eq!(times.len(), 5);

        // 300 * 2^2 = 1200 exceeds the clamp: attempts 4 and 5 both
        // wait 1000ms plus jitter.
        for gap in [times[3] - times[2], times[4] - times[3]] {
            assert!(gap >= Duration::from_millis(1000), "{gap:?}");
            assert!(gap <= Duration::from_millis(1200), "{gap:?}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_carries_last_cause_after_all_attempts() {
        let sink = FlakySink::failing(u32::MAX);
        let policy = RetryPolicy::default();

        let err = publish_with_retry(&sink, &test_event(), &policy)
            .await
            .expect_err("publish should exhaust");

        assert_eq!(sink.attempt_times().len(), 6);
        match err {
            PublishError::Exhausted { attempts, source } => {
                assert_eq!(attempts, 6);
                assert!(source.to_string().contains("broker unavailable"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn first_attempt_success_does_not_wait() {
        let sink = FlakySink::failing(0);
        let start = Instant::now();
        publish_with_retry(&sink, &test_event(), &RetryPolicy::default())
            .await
            .expect("publish should succeed immediately");
        assert_eq!(sink.attempt_times().len(), 1);
        assert!(start.elapsed() < Duration::from_millis(50));
    }
}
