use chrono::{DateTime, Utc};
use sqlx::PgPool;

use aggregator::writer::{AggregateWriter, BatchOutcome, PgAggregateWriter};
use common_types::{EnrichedAdEvent, EventType};

fn event(event_id: &str, event_type: EventType, ad_id: &str, ts: &str) -> EnrichedAdEvent {
    let ts: DateTime<Utc> = ts.parse().unwrap();
    EnrichedAdEvent {
        event_id: event_id.to_string(),
        event_type,
        ad_id: ad_id.to_string(),
        campaign_id: None,
        user_id: None,
        ts,
        received_at: ts,
    }
}

async fn stats(pool: &PgPool, ad_id: &str) -> Vec<(DateTime<Utc>, i64, i64)> {
    sqlx::query_as(
        "SELECT bucket_start, impressions, clicks FROM ad_stats_minute
         WHERE ad_id = $1 ORDER BY bucket_start",
    )
    .bind(ad_id)
    .fetch_all(pool)
    .await
    .unwrap()
}

#[sqlx::test(migrations = "./migrations")]
async fn aggregates_into_minute_buckets(pool: PgPool) {
    let writer = PgAggregateWriter::new(pool.clone(), 200);

    let outcome = writer
        .write_batch(&[
            event("e1", EventType::Impression, "ad_1", "2026-02-01T12:00:05Z"),
            event("e2", EventType::Click, "ad_1", "2026-02-01T12:00:59Z"),
            event("e3", EventType::Impression, "ad_1", "2026-02-01T12:01:00Z"),
            event("e4", EventType::Impression, "ad_2", "2026-02-01T12:00:30Z"),
        ])
        .await
        .unwrap();
    assert_eq!(
        outcome,
        BatchOutcome {
            processed: 4,
            deduped: 0
        }
    );

    let ad1 = stats(&pool, "ad_1").await;
    assert_eq!(
        ad1,
        vec![
            ("2026-02-01T12:00:00Z".parse().unwrap(), 1, 1),
            ("2026-02-01T12:01:00Z".parse().unwrap(), 1, 0),
        ]
    );
    let ad2 = stats(&pool, "ad_2").await;
    assert_eq!(ad2, vec![("2026-02-01T12:00:00Z".parse().unwrap(), 1, 0)]);
}

#[sqlx::test(migrations = "./migrations")]
async fn in_batch_duplicate_counts_once(pool: PgPool) {
    let writer = PgAggregateWriter::new(pool.clone(), 200);

    let outcome = writer
        .write_batch(&[
            event("e1", EventType::Impression, "ad_1", "2026-02-01T12:00:05Z"),
            event("e1", EventType::Impression, "ad_1", "2026-02-01T12:00:05Z"),
        ])
        .await
        .unwrap();
    assert_eq!(
        outcome,
        BatchOutcome {
            processed: 1,
            deduped: 1
        }
    );

    let ad1 = stats(&pool, "ad_1").await;
    assert_eq!(ad1, vec![("2026-02-01T12:00:00Z".parse().unwrap(), 1, 0)]);
}

#[sqlx::test(migrations = "./migrations")]
async fn deduplicates_across_batches(pool: PgPool) {
    let writer = PgAggregateWriter::new(pool.clone(), 200);

    writer
        .write_batch(&[event(
            "e1",
            EventType::Click,
            "ad_1",
            "2026-02-01T12:00:05Z",
        )])
        .await
        .unwrap();

    let outcome = writer
        .write_batch(&[
            event("e1", EventType::Click, "ad_1", "2026-02-01T12:00:05Z"),
            event("e2", EventType::Click, "ad_1", "2026-02-01T12:00:06Z"),
        ])
        .await
        .unwrap();
    assert_eq!(
        outcome,
        BatchOutcome {
            processed: 1,
            deduped: 1
        }
    );

    let ad1 = stats(&pool, "ad_1").await;
    assert_eq!(ad1, vec![("2026-02-01T12:00:00Z".parse().unwrap(), 0, 2)]);
}

#[sqlx::test(migrations = "./migrations")]
async fn redelivered_batch_is_a_no_op(pool: PgPool) {
    let writer = PgAggregateWriter::new(pool.clone(), 200);

    let batch = vec![
        event("e1", EventType::Impression, "ad_1", "2026-02-01T12:00:05Z"),
        event("e2", EventType::Click, "ad_1", "2026-02-01T12:00:06Z"),
    ];
    writer.write_batch(&batch).await.unwrap();
    let before = stats(&pool, "ad_1").await;

    // Simulates a commit failure followed by a redelivery of the same batch
    let outcome = writer.write_batch(&batch).await.unwrap();
    assert_eq!(
        outcome,
        BatchOutcome {
            processed: 0,
            deduped: 2
        }
    );
    assert_eq!(stats(&pool, "ad_1").await, before);
}

#[sqlx::test(migrations = "./migrations")]
async fn chunked_upsert_covers_every_key(pool: PgPool) {
    // chunk_size 2 with 5 distinct ads forces three statements
    let writer = PgAggregateWriter::new(pool.clone(), 2);

    let batch: Vec<EnrichedAdEvent> = (0..5)
        .map(|i| {
            event(
                &format!("e{i}"),
                EventType::Impression,
                &format!("ad_{i}"),
                "2026-02-01T12:00:05Z",
            )
        })
        .collect();
    let outcome = writer.write_batch(&batch).await.unwrap();
    assert_eq!(outcome.processed, 5);

    for i in 0..5 {
        let rows = stats(&pool, &format!("ad_{i}")).await;
        assert_eq!(rows, vec![("2026-02-01T12:00:00Z".parse().unwrap(), 1, 0)]);
    }
}

#[sqlx::test(migrations = "./migrations")]
async fn zero_chunk_size_is_clamped(pool: PgPool) {
    let writer = PgAggregateWriter::new(pool.clone(), 0);

    let outcome = writer
        .write_batch(&[
            event("e1", EventType::Impression, "ad_1", "2026-02-01T12:00:05Z"),
            event("e2", EventType::Click, "ad_1", "2026-02-01T12:00:06Z"),
        ])
        .await
        .unwrap();
    assert_eq!(outcome.processed, 2);

    let ad1 = stats(&pool, "ad_1").await;
    assert_eq!(ad1, vec![("2026-02-01T12:00:00Z".parse().unwrap(), 1, 1)]);
}

#[sqlx::test(migrations = "./migrations")]
async fn empty_batch_writes_nothing(pool: PgPool) {
    let writer = PgAggregateWriter::new(pool.clone(), 200);
    let outcome = writer.write_batch(&[]).await.unwrap();
    assert_eq!(outcome, BatchOutcome::default());

    let count: i64 = sqlx::query_scalar("SELECT count(*) FROM processed_events")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 0);
}
