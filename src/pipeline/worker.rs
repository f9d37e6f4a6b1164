use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::{
    clients::{
        notifier::{NotificationTarget, Notifier},
        store::EventStore,
    },
    error::AppError,
    models::{event::Event, metrics::Metric, retry::RetryPolicy},
    utils::unix_millis,
};

pub const NOTIFICATION_TITLE: &str = "New Order";

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub batch_size: usize,
    pub block_timeout: Duration,
    pub error_pause: Duration,
    pub default_topic: String,
    pub retry_policy: RetryPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            batch_size: 1,
            block_timeout: Duration::from_secs(1),
            error_pause: Duration::from_secs(5),
            default_topic: "orders".to_string(),
            retry_policy: RetryPolicy::default(),
        }
    }
}

/// Drains the queue and delivers one notification per event.
///
/// A failed delivery is retried by re-appending a copy with a higher
/// `retry_count` once its backoff has elapsed; after `max_retries` failed
/// attempts the event is dead-lettered instead. Retries are written to the
/// store's schedule before the original entry is acknowledged, so a crash in
/// between redelivers rather than drops.
pub struct Worker<S, N> {
    store: S,
    notifier: N,
    config: WorkerConfig,
    running: Arc<AtomicBool>,
}

impl<S: EventStore, N: Notifier> Worker<S, N> {
    pub fn new(store: S, notifier: N, config: WorkerConfig) -> Self {
        Self {
            store,
            notifier,
            config,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Clearing the returned flag makes `run` return after its current
    /// iteration.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn stop(&self) {
        info!("Stopping worker...");
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub async fn run(&self) {
        info!(
            batch_size = self.config.batch_size,
            max_retries = self.config.retry_policy.max_retries,
            "Starting event worker"
        );

        while self.is_running() {
            if let Err(e) = self.process_batch().await {
                error!(
                    error = %e,
                    pause_ms = self.config.error_pause.as_millis() as u64,
                    "Worker error, pausing before next checkout"
                );
                sleep(self.config.error_pause).await;
            }
        }

        info!("Event worker stopped");
    }

    /// One loop iteration: promote due retries, then check out and process a
    /// batch. Returns how many events were checked out.
    pub async fn process_batch(&self) -> Result<usize, AppError> {
        let promoted = self.store.promote_due_retries(unix_millis()).await?;
        if promoted > 0 {
            debug!(promoted, "Re-queued due retries");
        }

        let events = self
            .store
            .checkout(self.config.batch_size, self.config.block_timeout)
            .await?;

        // Every claimed event gets its attempt; the first error is reported
        // once the batch is done.
        let count = events.len();
        let mut first_error = None;
        for event in events {
            if let Err(e) = self.process_event(&event).await {
                error!(event_id = %event.event_id, error = %e, "Failed to settle event");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(count),
        }
    }

    async fn process_event(&self, event: &Event) -> Result<(), AppError> {
        let handle = event
            .delivery_handle
            .as_deref()
            .ok_or_else(|| AppError::Internal("Checked-out event has no delivery handle".to_string()))?;

        info!(
            event_id = %event.event_id,
            delivery_handle = %handle,
            retry_count = event.retry_count,
            "Processing event"
        );

        match self.deliver(event).await {
            Ok(()) => {
                self.store.ack(handle).await?;
                self.store.incr_metric(Metric::Sent).await?;
                info!(event_id = %event.event_id, "Event processed successfully");
                Ok(())
            }
            Err(e) => {
                warn!(event_id = %event.event_id, error = %e, "Event delivery failed");
                self.handle_failure(event, handle).await
            }
        }
    }

    /// Sends the order notification to the recipient's registered token, or
    /// to the broadcast topic when none is registered.
    pub async fn deliver(&self, event: &Event) -> Result<(), AppError> {
        let token = match event.recipient() {
            Some(user_id) => self.store.get_token(user_id).await?,
            None => None,
        };

        let target = match token {
            Some(token) => NotificationTarget::Token(token),
            None => NotificationTarget::Topic(self.config.default_topic.clone()),
        };

        let body = format!(
            "Order {} placed by {}",
            event.order_id().unwrap_or_else(|| "unknown".to_string()),
            event.recipient().unwrap_or("unknown")
        );

        self.notifier
            .send(&target, NOTIFICATION_TITLE, &body)
            .await?;

        debug!(event_id = %event.event_id, %target, "Notification delivered");
        Ok(())
    }

    async fn handle_failure(&self, event: &Event, handle: &str) -> Result<(), AppError> {
        let policy = &self.config.retry_policy;
        let attempt = event.retry_count + 1;

        if policy.is_exhausted(attempt) {
            warn!(
                event_id = %event.event_id,
                retry_count = attempt,
                "Moving event to dead-letter queue"
            );
            self.store
                .move_to_dead_letter(&event.dead_lettered(attempt))
                .await?;
            self.store.ack(handle).await?;
            return Ok(());
        }

        let delay = policy.delay_for(attempt);
        info!(
            event_id = %event.event_id,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Scheduling retry"
        );

        self.store.incr_metric(Metric::Failed).await?;
        self.store
            .schedule_retry(
                &event.requeued(attempt),
                unix_millis() + delay.as_millis() as i64,
            )
            .await?;
        self.store.ack(handle).await?;

        Ok(())
    }
}
