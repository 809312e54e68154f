use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use thiserror::Error;

use common_types::{bucket_minute, EnrichedAdEvent, EventType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatchOutcome {
    /// Events newly incorporated into the aggregates.
    pub processed: usize,
    /// Events recognized as already seen and dropped.
    pub deduped: usize,
}

#[derive(Error, Debug)]
pub enum WriteError {
    #[error("aggregate transaction failed: {0}")]
    Database(#[from] sqlx::Error),
}

#[async_trait]
pub trait AggregateWriter: Send + Sync {
    async fn write_batch(&self, events: &[EnrichedAdEvent]) -> Result<BatchOutcome, WriteError>;
}

/// Writes a batch of events into Postgres as one atomic transaction:
/// insert-if-absent into the seen-event set, then additively upsert
/// per-(minute, ad) counters for the events that were actually new.
///
/// The insert-if-absent is what makes redelivery safe: a replayed event
/// conflicts on `processed_events.event_id` and never reaches the
/// aggregate counters a second time. Both statements rely on native
/// conflict resolution rather than read-modify-write, so concurrent
/// consumers on other partitions cannot lose increments, and READ
/// COMMITTED is a sufficient isolation level.
pub struct PgAggregateWriter {
    pool: PgPool,
    chunk_size: usize,
}

impl PgAggregateWriter {
    pub fn new(pool: PgPool, chunk_size: usize) -> Self {
        Self {
            pool,
            chunk_size: chunk_size.max(1),
        }
    }
}

#[async_trait]
impl AggregateWriter for PgAggregateWriter {
    async fn write_batch(&self, events: &[EnrichedAdEvent]) -> Result<BatchOutcome, WriteError> {
        if events.is_empty() {
            return Ok(BatchOutcome::default());
        }

        let mut tx = self.pool.begin().await?;

        let ids: Vec<String> = events.iter().map(|e| e.event_id.clone()).collect();
        let inserted: Vec<String> = sqlx::query_scalar(
            r#"
            INSERT INTO processed_events (event_id)
                SELECT * FROM UNNEST($1::text[])
                ON CONFLICT DO NOTHING
                RETURNING event_id"#,
        )
        .bind(&ids)
        .fetch_all(&mut *tx)
        .await?;

        // An event is new iff its id was inserted just now and this is
        // its first occurrence within the batch; a second copy in the
        // same batch is a duplicate like any redelivered one.
        let newly_inserted: HashSet<&str> = inserted.iter().map(String::as_str).collect();
        let mut first_seen: HashSet<&str> = HashSet::with_capacity(inserted.len());
        let mut new_events: Vec<&EnrichedAdEvent> = Vec::with_capacity(inserted.len());
        for event in events {
            if newly_inserted.contains(event.event_id.as_str())
                && first_seen.insert(event.event_id.as_str())
            {
                new_events.push(event);
            }
        }
        let deduped = events.len() - new_events.len();

        // Wholly a replay: commit the no-op instead of touching counters
        if new_events.is_empty() {
            tx.commit().await?;
            return Ok(BatchOutcome {
                processed: 0,
                deduped,
            });
        }

        let mut deltas: HashMap<(DateTime<Utc>, String), (i64, i64)> = HashMap::new();
        for event in &new_events {
            let key = (bucket_minute(event.ts), event.ad_id.clone());
            let entry = deltas.entry(key).or_default();
            match event.event_type {
                EventType::Impression => entry.0 += 1,
                EventType::Click => entry.1 += 1,
            }
        }

        // Chunking bounds statement size only; every chunk runs inside
        // the same transaction.
        let rows: Vec<((DateTime<Utc>, String), (i64, i64))> = deltas.into_iter().collect();
        for chunk in rows.chunks(self.chunk_size) {
            let mut bucket_starts = Vec::with_capacity(chunk.len());
            let mut ad_ids = Vec::with_capacity(chunk.len());
            let mut impressions = Vec::with_capacity(chunk.len());
            let mut clicks = Vec::with_capacity(chunk.len());
            for ((bucket_start, ad_id), (imps, clks)) in chunk {
                bucket_starts.push(*bucket_start);
                ad_ids.push(ad_id.clone());
                impressions.push(*imps);
                clicks.push(*clks);
            }

            sqlx::query(
                r#"
                INSERT INTO ad_stats_minute (bucket_start, ad_id, impressions, clicks)
                    SELECT * FROM UNNEST(
                        $1::timestamptz[],
                        $2::text[],
                        $3::bigint[],
                        $4::bigint[])
                    ON CONFLICT (bucket_start, ad_id)
                    DO UPDATE SET
                        impressions = ad_stats_minute.impressions + EXCLUDED.impressions,
                        clicks = ad_stats_minute.clicks + EXCLUDED.clicks,
                        updated_at = now()"#,
            )
            .bind(&bucket_starts)
            .bind(&ad_ids)
            .bind(&impressions)
            .bind(&clicks)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(BatchOutcome {
            processed: new_events.len(),
            deduped,
        })
    }
}
