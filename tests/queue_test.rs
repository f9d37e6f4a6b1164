use std::time::Duration;

use anyhow::Result;
use order_relay::{
    clients::store::EventStore,
    models::{event::EventStatus, metrics::Metric},
    utils::unix_millis,
};
use tokio::time::{Instant, sleep};

use crate::common::{memory_store, metric, order_event};

const SHORT_BLOCK: Duration = Duration::from_millis(20);

/// Test: Entries are handed out in append order and claimed only once
#[tokio::test]
async fn test_checkout_preserves_append_order() -> Result<()> {
    let store = memory_store();
    for id in ["evt_a", "evt_b", "evt_c"] {
        store.admit(&order_event(id, "o1", "u1")).await?;
    }

    let first = store.checkout(2, SHORT_BLOCK).await?;
    let ids: Vec<&str> = first.iter().map(|e| e.event_id.as_str()).collect();
    assert_eq!(ids, vec!["evt_a", "evt_b"]);
    assert!(first.iter().all(|e| e.delivery_handle.is_some()));

    let second = store.checkout(2, SHORT_BLOCK).await?;
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].event_id, "evt_c");

    let third = store.checkout(2, SHORT_BLOCK).await?;
    assert!(third.is_empty(), "Claimed entries must not be redelivered");

    Ok(())
}

/// Test: Checkout waits for an append instead of returning immediately
#[tokio::test]
async fn test_checkout_blocks_until_append() -> Result<()> {
    let store = memory_store();

    let producer = store.clone();
    tokio::spawn(async move {
        sleep(Duration::from_millis(50)).await;
        producer
            .append(&order_event("evt_late", "o1", "u1"))
            .await
            .unwrap();
    });

    let events = store.checkout(1, Duration::from_secs(2)).await?;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_id, "evt_late");

    Ok(())
}

/// Test: An empty checkout returns after the block timeout
#[tokio::test]
async fn test_empty_checkout_times_out() -> Result<()> {
    let store = memory_store();

    let start = Instant::now();
    let events = store.checkout(1, Duration::from_millis(100)).await?;

    assert!(events.is_empty());
    assert!(start.elapsed() >= Duration::from_millis(100));

    Ok(())
}

/// Test: Acknowledged entries leave the pending set
#[tokio::test]
async fn test_ack_removes_pending_entry() -> Result<()> {
    let store = memory_store();
    store.admit(&order_event("evt_ack", "o1", "u1")).await?;

    let events = store.checkout(1, SHORT_BLOCK).await?;
    assert_eq!(store.pending_count().await, 1);

    store
        .ack(events[0].delivery_handle.as_deref().unwrap())
        .await?;
    assert_eq!(store.pending_count().await, 0);

    Ok(())
}

/// Test: Dead-lettering counts the event but leaves the entry pending
#[tokio::test]
async fn test_dead_letter_does_not_ack() -> Result<()> {
    let store = memory_store();
    store.admit(&order_event("evt_dlq", "o1", "u1")).await?;

    let mut events = store.checkout(1, SHORT_BLOCK).await?;
    let mut event = events.remove(0);
    event.retry_count = 3;

    store.move_to_dead_letter(&event).await?;

    assert_eq!(store.pending_count().await, 1);
    assert_eq!(metric(&store, Metric::Dlq).await, 1);

    let dead = store.dead_letters().await;
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].status, EventStatus::Failed);
    assert_eq!(dead[0].retry_count, 3);
    assert_eq!(dead[0].delivery_handle, None);

    Ok(())
}

/// Test: Recent view merges queue and dead-letter entries newest first
#[tokio::test]
async fn test_recent_merges_queue_and_dead_letters() -> Result<()> {
    let store = memory_store();

    let mut old = order_event("evt_old", "o1", "u1");
    old.received_at = 100;
    let mut dead = order_event("evt_dead", "o2", "u2");
    dead.received_at = 200;
    let mut new = order_event("evt_new", "o3", "u3");
    new.received_at = 300;

    store.admit(&old).await?;
    store.admit(&new).await?;
    store.move_to_dead_letter(&dead).await?;

    let recent = store.recent(20).await?;
    let ids: Vec<&str> = recent.iter().map(|e| e.event_id.as_str()).collect();
    assert_eq!(ids, vec!["evt_new", "evt_dead", "evt_old"]);
    assert!(recent[0].delivery_handle.is_some());
    assert_eq!(recent[1].status, EventStatus::Failed);

    assert_eq!(store.recent(2).await?.len(), 2);
    assert!(store.recent(0).await?.is_empty());

    Ok(())
}

/// Test: Replay re-queues a fresh copy and bypasses dedup
#[tokio::test]
async fn test_replay_requeues_from_dedup_record() -> Result<()> {
    let store = memory_store();

    assert!(!store.replay("evt_unknown").await?);

    store.admit(&order_event("evt_replay", "o1", "u1")).await?;
    let original = store.checkout(1, SHORT_BLOCK).await?.remove(0);
    store.ack(original.delivery_handle.as_deref().unwrap()).await?;

    assert!(store.replay("evt_replay").await?);

    let replayed = store.checkout(1, SHORT_BLOCK).await?.remove(0);
    assert_eq!(replayed.event_id, "evt_replay");
    assert_eq!(replayed.status, EventStatus::Queued);
    assert_eq!(replayed.retry_count, 0);
    assert_ne!(replayed.delivery_handle, original.delivery_handle);

    assert_eq!(metric(&store, Metric::Received).await, 1);
    assert_eq!(metric(&store, Metric::Deduped).await, 0);

    Ok(())
}

/// Test: Scheduled retries reach the queue tail only once due
#[tokio::test]
async fn test_scheduled_retries_promote_when_due() -> Result<()> {
    let store = memory_store();
    let now = unix_millis();

    store
        .schedule_retry(&order_event("evt_retry", "o1", "u1").requeued(1), now + 5_000)
        .await?;
    store.admit(&order_event("evt_fresh", "o2", "u2")).await?;

    assert_eq!(store.promote_due_retries(now).await?, 0);
    assert_eq!(store.scheduled_retries().await.len(), 1);

    assert_eq!(store.promote_due_retries(now + 5_000).await?, 1);
    assert!(store.scheduled_retries().await.is_empty());

    let events = store.checkout(10, SHORT_BLOCK).await?;
    let ids: Vec<&str> = events.iter().map(|e| e.event_id.as_str()).collect();
    assert_eq!(ids, vec!["evt_fresh", "evt_retry"]);
    assert_eq!(events[1].retry_count, 1);

    Ok(())
}

/// Test: Two identical retry copies both reach the queue
#[tokio::test]
async fn test_identical_retries_are_kept_apart() -> Result<()> {
    let store = memory_store();
    let now = unix_millis();
    let retry = order_event("evt_twice", "o1", "u1").requeued(1);

    store.schedule_retry(&retry, now).await?;
    store.schedule_retry(&retry, now).await?;

    assert_eq!(store.promote_due_retries(now).await?, 2);
    assert_eq!(store.checkout(10, SHORT_BLOCK).await?.len(), 2);

    Ok(())
}
