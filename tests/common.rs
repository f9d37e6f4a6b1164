use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

use axum::{
    body::Body,
    http::{Request, Response},
};
use order_relay::{
    clients::{
        memory::MemoryStore,
        notifier::{NotificationTarget, Notifier},
        store::{EventStore, StoreConfig},
    },
    config::Config,
    error::AppError,
    models::{
        event::Event,
        metrics::{Metric, MetricsSnapshot},
        retry::RetryPolicy,
    },
    pipeline::{signature::compute_signature, worker::WorkerConfig},
    utils::unix_seconds,
};
use serde_json::json;

pub const SECRET: &str = "whsec_integration";

pub fn test_config() -> Config {
    Config {
        redis_url: "redis://127.0.0.1:6379".to_string(),
        stream_name: "orders-stream".to_string(),
        dlq_name: "orders-dlq".to_string(),
        retry_set_name: "orders-retry".to_string(),
        consumer_group: "workers".to_string(),
        consumer_name: "worker-1".to_string(),
        dedup_ttl_seconds: 24 * 60 * 60,
        webhook_secret: SECRET.to_string(),
        max_event_age_seconds: 300,
        rate_limit_window_seconds: 10,
        rate_limit_max_requests: 10,
        max_retry_attempts: 3,
        retry_backoff_seconds: vec![1, 4, 10],
        batch_size: 1,
        block_timeout_ms: 20,
        error_pause_ms: 10,
        shutdown_grace_ms: 100,
        notification_topic: "orders".to_string(),
        fcm_project_id: "test-project".to_string(),
        fcm_base_url: "http://127.0.0.1:9".to_string(),
        fcm_access_token: Some("test-token".to_string()),
        fcm_dry_run: false,
        server_port: 0,
        log_format: "pretty".to_string(),
    }
}

pub fn memory_store() -> MemoryStore {
    MemoryStore::new(StoreConfig::default())
}

/// Worker settings with no backoff so retries are due immediately.
pub fn fast_worker_config() -> WorkerConfig {
    WorkerConfig {
        batch_size: 1,
        block_timeout: Duration::from_millis(20),
        error_pause: Duration::from_millis(10),
        default_topic: "orders".to_string(),
        retry_policy: RetryPolicy {
            max_retries: 3,
            backoff: vec![Duration::ZERO],
        },
    }
}

pub fn order_event(event_id: &str, order_id: &str, user_id: &str) -> Event {
    Event::new(
        event_id.to_string(),
        "order.created".to_string(),
        json!({ "order_id": order_id, "userId": user_id, "amount": 42 }),
        unix_seconds(),
    )
}

pub fn order_body(event_id: &str, order_id: &str, user_id: &str) -> String {
    json!({
        "event_id": event_id,
        "type": "order.created",
        "data": { "order_id": order_id, "userId": user_id, "amount": 42 }
    })
    .to_string()
}

pub fn signed_webhook(body: &str, timestamp: i64, client: &str) -> Request<Body> {
    let signature = compute_signature(body.as_bytes(), SECRET.as_bytes());

    Request::builder()
        .method("POST")
        .uri("/api/webhook/order.created")
        .header("content-type", "application/json")
        .header("x-signature", format!("sha256={}", signature))
        .header("x-timestamp", timestamp.to_string())
        .header("x-forwarded-for", client)
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub async fn json_body(response: Response<Body>) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

pub async fn metric(store: &impl EventStore, metric: Metric) -> u64 {
    let snapshot: MetricsSnapshot = store.metrics().await.unwrap();
    snapshot.get(metric)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentNotification {
    pub target: NotificationTarget,
    pub title: String,
    pub body: String,
}

/// Records every send; fails any send whose body contains `fail_marker`.
#[derive(Clone, Default)]
pub struct ScriptedNotifier {
    pub attempts: Arc<Mutex<Vec<SentNotification>>>,
    fail_marker: Option<String>,
}

impl ScriptedNotifier {
    pub fn failing_when(marker: &str) -> Self {
        Self {
            attempts: Arc::default(),
            fail_marker: Some(marker.to_string()),
        }
    }

    pub fn attempts(&self) -> Vec<SentNotification> {
        self.attempts.lock().unwrap().clone()
    }
}

impl Notifier for ScriptedNotifier {
    async fn send(
        &self,
        target: &NotificationTarget,
        title: &str,
        body: &str,
    ) -> Result<(), AppError> {
        self.attempts.lock().unwrap().push(SentNotification {
            target: target.clone(),
            title: title.to_string(),
            body: body.to_string(),
        });

        match &self.fail_marker {
            Some(marker) if body.contains(marker.as_str()) => {
                Err(AppError::Transport("scripted failure".to_string()))
            }
            _ => Ok(()),
        }
    }
}

/// Memory store whose next `n` checkouts (and optionally acks) fail as if
/// Redis were unreachable.
#[derive(Clone)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    failing_checkouts: Arc<AtomicU32>,
    failing_acks: Arc<AtomicU32>,
}

fn take_failure(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

impl FlakyStore {
    pub fn new(inner: MemoryStore, failing_checkouts: u32) -> Self {
        Self {
            inner,
            failing_checkouts: Arc::new(AtomicU32::new(failing_checkouts)),
            failing_acks: Arc::default(),
        }
    }

    pub fn with_failing_acks(self, failing_acks: u32) -> Self {
        self.failing_acks.store(failing_acks, Ordering::SeqCst);
        self
    }

    pub fn remaining_failures(&self) -> u32 {
        self.failing_checkouts.load(Ordering::SeqCst)
    }
}

fn unavailable() -> AppError {
    AppError::Store(redis::RedisError::from((
        redis::ErrorKind::IoError,
        "connection refused",
    )))
}

impl EventStore for FlakyStore {
    async fn open(&self) -> Result<(), AppError> {
        self.inner.open().await
    }

    async fn admit(&self, event: &Event) -> Result<bool, AppError> {
        self.inner.admit(event).await
    }

    async fn lookup(&self, event_id: &str) -> Result<Option<Event>, AppError> {
        self.inner.lookup(event_id).await
    }

    async fn append(&self, event: &Event) -> Result<String, AppError> {
        self.inner.append(event).await
    }

    async fn checkout(&self, max_items: usize, block: Duration) -> Result<Vec<Event>, AppError> {
        if take_failure(&self.failing_checkouts) {
            return Err(unavailable());
        }
        self.inner.checkout(max_items, block).await
    }

    async fn ack(&self, delivery_handle: &str) -> Result<(), AppError> {
        if take_failure(&self.failing_acks) {
            return Err(unavailable());
        }
        self.inner.ack(delivery_handle).await
    }

    async fn move_to_dead_letter(&self, event: &Event) -> Result<(), AppError> {
        self.inner.move_to_dead_letter(event).await
    }

    async fn recent(&self, limit: usize) -> Result<Vec<Event>, AppError> {
        self.inner.recent(limit).await
    }

    async fn replay(&self, event_id: &str) -> Result<bool, AppError> {
        self.inner.replay(event_id).await
    }

    async fn schedule_retry(&self, event: &Event, due_at_ms: i64) -> Result<(), AppError> {
        self.inner.schedule_retry(event, due_at_ms).await
    }

    async fn promote_due_retries(&self, now_ms: i64) -> Result<usize, AppError> {
        self.inner.promote_due_retries(now_ms).await
    }

    async fn incr_metric(&self, metric: Metric) -> Result<(), AppError> {
        self.inner.incr_metric(metric).await
    }

    async fn metrics(&self) -> Result<MetricsSnapshot, AppError> {
        self.inner.metrics().await
    }

    async fn incr_rate_limit(&self, client_key: &str, window: Duration) -> Result<u64, AppError> {
        self.inner.incr_rate_limit(client_key, window).await
    }

    async fn get_token(&self, user_id: &str) -> Result<Option<String>, AppError> {
        self.inner.get_token(user_id).await
    }

    async fn set_token(&self, user_id: &str, token: &str) -> Result<(), AppError> {
        self.inner.set_token(user_id, token).await
    }

    async fn ping(&self) -> Result<(), AppError> {
        self.inner.ping().await
    }
}
