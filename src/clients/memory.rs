use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

use tokio::{
    sync::{Mutex, Notify},
    time::{Instant, timeout_at},
};
use tracing::debug;

use crate::{
    clients::store::{EventStore, StoreConfig, merge_recent},
    error::AppError,
    models::{
        event::Event,
        metrics::{Metric, MetricsSnapshot},
    },
};

#[derive(Default)]
struct State {
    next_id: u64,
    // Entry id -> stored record, in append order.
    stream: BTreeMap<u64, String>,
    // Highest id handed to the consumer group.
    last_delivered: u64,
    pending: HashSet<u64>,
    dedup: HashMap<String, (String, Instant)>,
    dead_letters: Vec<String>,
    retries: Vec<(i64, String)>,
    metrics: MetricsSnapshot,
    windows: HashMap<String, (u64, Instant)>,
    tokens: HashMap<String, String>,
}

impl State {
    fn append(&mut self, record: String) -> u64 {
        self.next_id += 1;
        self.stream.insert(self.next_id, record);
        self.next_id
    }

    fn bump(&mut self, metric: Metric) {
        let value = self.metrics.get(metric) + 1;
        self.metrics.set(metric, value);
    }
}

/// Single-process [`EventStore`] used by tests and local runs without Redis.
///
/// One mutex guards all state, which gives every operation the same atomicity
/// the Redis scripts provide. Expiry uses tokio's clock so paused-time tests
/// can step over TTLs.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
    appended: Arc<Notify>,
    config: Arc<StoreConfig>,
}

impl MemoryStore {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            state: Arc::default(),
            appended: Arc::default(),
            config: Arc::new(config),
        }
    }

    pub async fn dead_letters(&self) -> Vec<Event> {
        let state = self.state.lock().await;
        state
            .dead_letters
            .iter()
            .rev()
            .filter_map(|r| Event::from_record(r).ok())
            .collect()
    }

    pub async fn pending_count(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    pub async fn scheduled_retries(&self) -> Vec<(i64, Event)> {
        let state = self.state.lock().await;
        state
            .retries
            .iter()
            .filter_map(|(due, r)| Event::from_record(r).ok().map(|e| (*due, e)))
            .collect()
    }

    fn parse_handle(handle: &str) -> Option<u64> {
        handle.strip_suffix("-0")?.parse().ok()
    }

    fn handle_for(id: u64) -> String {
        format!("{}-0", id)
    }

    async fn append_record(&self, record: String) -> String {
        let id = self.state.lock().await.append(record);
        self.appended.notify_waiters();
        Self::handle_for(id)
    }

    async fn claim(&self, max_items: usize) -> Result<Vec<Event>, AppError> {
        let mut state = self.state.lock().await;

        let ids: Vec<u64> = state
            .stream
            .range(state.last_delivered + 1..)
            .take(max_items)
            .map(|(id, _)| *id)
            .collect();

        let mut events = Vec::with_capacity(ids.len());
        for id in ids {
            state.last_delivered = id;
            state.pending.insert(id);
            let mut event = Event::from_record(&state.stream[&id])?;
            event.delivery_handle = Some(Self::handle_for(id));
            events.push(event);
        }

        Ok(events)
    }
}

impl EventStore for MemoryStore {
    async fn open(&self) -> Result<(), AppError> {
        debug!(group = %self.config.consumer_group, "In-memory queue opened");
        Ok(())
    }

    async fn admit(&self, event: &Event) -> Result<bool, AppError> {
        let record = event.to_record()?;
        let now = Instant::now();

        {
            let mut state = self.state.lock().await;

            let live = state
                .dedup
                .get(&event.event_id)
                .is_some_and(|(_, expires_at)| *expires_at > now);
            if live {
                state.bump(Metric::Deduped);
                return Ok(false);
            }

            state.dedup.insert(
                event.event_id.clone(),
                (record.clone(), now + self.config.dedup_ttl),
            );
            state.append(record);
            state.bump(Metric::Received);
        }

        self.appended.notify_waiters();
        Ok(true)
    }

    async fn lookup(&self, event_id: &str) -> Result<Option<Event>, AppError> {
        let state = self.state.lock().await;
        match state.dedup.get(event_id) {
            Some((record, expires_at)) if *expires_at > Instant::now() => {
                Ok(Some(Event::from_record(record)?))
            }
            _ => Ok(None),
        }
    }

    async fn append(&self, event: &Event) -> Result<String, AppError> {
        Ok(self.append_record(event.to_record()?).await)
    }

    async fn checkout(&self, max_items: usize, block: Duration) -> Result<Vec<Event>, AppError> {
        let deadline = Instant::now() + block;

        loop {
            let notified = self.appended.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let events = self.claim(max_items).await?;
            if !events.is_empty() {
                return Ok(events);
            }

            if timeout_at(deadline, notified).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn ack(&self, delivery_handle: &str) -> Result<(), AppError> {
        if let Some(id) = Self::parse_handle(delivery_handle) {
            self.state.lock().await.pending.remove(&id);
        }
        Ok(())
    }

    async fn move_to_dead_letter(&self, event: &Event) -> Result<(), AppError> {
        let record = event.dead_lettered(event.retry_count).to_record()?;
        let mut state = self.state.lock().await;
        state.dead_letters.push(record);
        state.bump(Metric::Dlq);
        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<Event>, AppError> {
        let state = self.state.lock().await;

        let queued = state
            .stream
            .iter()
            .rev()
            .take(limit)
            .map(|(id, record)| -> Result<Event, AppError> {
                let mut event = Event::from_record(record)?;
                event.delivery_handle = Some(Self::handle_for(*id));
                Ok(event)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let dead = state
            .dead_letters
            .iter()
            .rev()
            .take(limit)
            .map(|r| Event::from_record(r))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(merge_recent(queued, dead, limit))
    }

    async fn replay(&self, event_id: &str) -> Result<bool, AppError> {
        let Some(event) = self.lookup(event_id).await? else {
            return Ok(false);
        };
        self.append(&event.requeued(0)).await?;
        Ok(true)
    }

    async fn schedule_retry(&self, event: &Event, due_at_ms: i64) -> Result<(), AppError> {
        let record = event.to_record()?;
        self.state.lock().await.retries.push((due_at_ms, record));
        Ok(())
    }

    async fn promote_due_retries(&self, now_ms: i64) -> Result<usize, AppError> {
        let promoted = {
            let mut state = self.state.lock().await;

            let (mut due, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut state.retries)
                .into_iter()
                .partition(|(due_at, _)| *due_at <= now_ms);
            state.retries = waiting;

            due.sort_by_key(|(due_at, _)| *due_at);
            let count = due.len();
            for (_, record) in due {
                state.append(record);
            }
            count
        };

        if promoted > 0 {
            self.appended.notify_waiters();
        }
        Ok(promoted)
    }

    async fn incr_metric(&self, metric: Metric) -> Result<(), AppError> {
        self.state.lock().await.bump(metric);
        Ok(())
    }

    async fn metrics(&self) -> Result<MetricsSnapshot, AppError> {
        Ok(self.state.lock().await.metrics)
    }

    async fn incr_rate_limit(&self, client_key: &str, window: Duration) -> Result<u64, AppError> {
        let now = Instant::now();
        let mut state = self.state.lock().await;

        let entry = state
            .windows
            .entry(client_key.to_string())
            .or_insert((0, now + window));
        if entry.1 <= now {
            *entry = (0, now + window);
        }
        entry.0 += 1;

        Ok(entry.0)
    }

    async fn get_token(&self, user_id: &str) -> Result<Option<String>, AppError> {
        Ok(self.state.lock().await.tokens.get(user_id).cloned())
    }

    async fn set_token(&self, user_id: &str, token: &str) -> Result<(), AppError> {
        self.state
            .lock()
            .await
            .tokens
            .insert(user_id.to_string(), token.to_string());
        Ok(())
    }

    async fn ping(&self) -> Result<(), AppError> {
        Ok(())
    }
}
