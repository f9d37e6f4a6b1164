use std::{future::Future, time::Duration};

use crate::{
    error::AppError,
    models::{
        event::Event,
        metrics::{Metric, MetricsSnapshot},
    },
};

/// Names and retention settings shared by every store implementation.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub stream_name: String,
    pub dlq_name: String,
    pub retry_set_name: String,
    pub consumer_group: String,
    pub consumer_name: String,
    pub dedup_ttl: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            stream_name: "orders-stream".to_string(),
            dlq_name: "orders-dlq".to_string(),
            retry_set_name: "orders-retry".to_string(),
            consumer_group: "workers".to_string(),
            consumer_name: "worker-1".to_string(),
            dedup_ttl: Duration::from_secs(24 * 60 * 60),
        }
    }
}

pub fn dedup_key(event_id: &str) -> String {
    format!("event:{}", event_id)
}

pub fn rate_limit_key(client_key: &str) -> String {
    format!("rate_limit:{}", client_key)
}

/// Counter that makes each retry-schedule member unique.
pub fn retry_sequence_key(retry_set_name: &str) -> String {
    format!("{}:seq", retry_set_name)
}

pub fn token_key(user_id: &str) -> String {
    format!("fcm:token:{}", user_id)
}

/// The durable store behind the pipeline: dedup records, the ordered queue
/// with its consumer group, the dead-letter list, the retry schedule, metric
/// counters, rate-limit windows and provider tokens.
///
/// Every mutating method is a single atomic request against the store, so
/// callers never need an in-process lock.
pub trait EventStore: Clone + Send + Sync + 'static {
    /// Prepares the queue and its consumer group. Safe to call repeatedly.
    fn open(&self) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Admits `event` unless a dedup record for its id exists. Returns `false`
    /// for duplicates.
    fn admit(&self, event: &Event) -> impl Future<Output = Result<bool, AppError>> + Send;

    fn lookup(&self, event_id: &str)
    -> impl Future<Output = Result<Option<Event>, AppError>> + Send;

    /// Appends to the queue tail and returns the delivery handle.
    fn append(&self, event: &Event) -> impl Future<Output = Result<String, AppError>> + Send;

    /// Claims up to `max_items` unclaimed entries for this consumer, waiting
    /// up to `block` when none are available.
    fn checkout(
        &self,
        max_items: usize,
        block: Duration,
    ) -> impl Future<Output = Result<Vec<Event>, AppError>> + Send;

    fn ack(&self, delivery_handle: &str) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Writes a terminal copy to the dead-letter list and counts it. The
    /// original entry still has to be acknowledged.
    fn move_to_dead_letter(&self, event: &Event)
    -> impl Future<Output = Result<(), AppError>> + Send;

    /// Newest queue entries merged with dead-letter records, newest first.
    fn recent(&self, limit: usize) -> impl Future<Output = Result<Vec<Event>, AppError>> + Send;

    /// Re-appends the dedup snapshot of `event_id` as a fresh queued entry,
    /// bypassing the dedup guard. Returns `false` for unknown ids.
    fn replay(&self, event_id: &str) -> impl Future<Output = Result<bool, AppError>> + Send;

    /// Durably records `event` for re-append once `due_at_ms` (unix millis)
    /// has passed.
    fn schedule_retry(
        &self,
        event: &Event,
        due_at_ms: i64,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Moves every scheduled retry due at `now_ms` onto the queue tail.
    fn promote_due_retries(&self, now_ms: i64)
    -> impl Future<Output = Result<usize, AppError>> + Send;

    fn incr_metric(&self, metric: Metric) -> impl Future<Output = Result<(), AppError>> + Send;

    fn metrics(&self) -> impl Future<Output = Result<MetricsSnapshot, AppError>> + Send;

    /// Counts one request in the fixed window for `client_key`, starting the
    /// window on its first request, and returns the count so far.
    fn incr_rate_limit(
        &self,
        client_key: &str,
        window: Duration,
    ) -> impl Future<Output = Result<u64, AppError>> + Send;

    fn get_token(&self, user_id: &str)
    -> impl Future<Output = Result<Option<String>, AppError>> + Send;

    fn set_token(
        &self,
        user_id: &str,
        token: &str,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    fn ping(&self) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// Merges queue entries and dead-letter records into one newest-first view.
/// Each input is already newest first; ties keep queue entries ahead.
pub fn merge_recent(queued: Vec<Event>, dead: Vec<Event>, limit: usize) -> Vec<Event> {
    let mut events = queued;
    events.extend(dead);
    events.sort_by(|a, b| b.received_at.cmp(&a.received_at));
    events.truncate(limit);
    events
}
