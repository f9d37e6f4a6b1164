use std::time::Duration;

use redis::{
    AsyncCommands, Client, Script,
    aio::MultiplexedConnection,
    streams::{StreamId, StreamRangeReply, StreamReadOptions, StreamReadReply},
};
use tracing::{debug, info, warn};

use crate::{
    clients::store::{
        EventStore, StoreConfig, dedup_key, merge_recent, rate_limit_key, retry_sequence_key,
        token_key,
    },
    error::AppError,
    models::{
        event::Event,
        metrics::{Metric, MetricsSnapshot},
    },
};

// SET NX EX + XADD + INCR in one round trip so concurrent duplicates admit once.
const ADMIT_SCRIPT: &str = r#"
if redis.call('SET', KEYS[1], ARGV[1], 'NX', 'EX', ARGV[2]) then
    redis.call('XADD', KEYS[2], '*', 'data', ARGV[1])
    redis.call('INCR', KEYS[3])
    return 1
end
redis.call('INCR', KEYS[4])
return 0
"#;

// Members are `{seq}:{record}` so identical records never collapse into one.
const SCHEDULE_SCRIPT: &str = r#"
local seq = redis.call('INCR', KEYS[2])
redis.call('ZADD', KEYS[1], ARGV[2], seq .. ':' .. ARGV[1])
return seq
"#;

const PROMOTE_SCRIPT: &str = r#"
local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, 100)
local promoted = 0
for _, member in ipairs(due) do
    if redis.call('ZREM', KEYS[1], member) == 1 then
        local sep = string.find(member, ':', 1, true)
        redis.call('XADD', KEYS[2], '*', 'data', string.sub(member, sep + 1))
        promoted = promoted + 1
    end
end
return promoted
"#;

const RATE_LIMIT_SCRIPT: &str = r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('EXPIRE', KEYS[1], ARGV[1])
end
return count
"#;

/// Redis-backed [`EventStore`]: a stream with one consumer group for the
/// queue, a list for dead letters and a sorted set for scheduled retries.
#[derive(Clone)]
pub struct RedisStore {
    connection: MultiplexedConnection,
    // XREADGROUP BLOCK stalls every request pipelined behind it.
    blocking_connection: MultiplexedConnection,
    config: StoreConfig,
    admit_script: Script,
    schedule_script: Script,
    promote_script: Script,
    rate_limit_script: Script,
}

impl RedisStore {
    pub async fn connect(redis_url: &str, config: StoreConfig) -> Result<Self, AppError> {
        info!("Connecting to Redis...");

        let client = Client::open(redis_url)?;
        let connection = client.get_multiplexed_async_connection().await?;
        let blocking_connection = client.get_multiplexed_async_connection().await?;

        info!(
            stream = %config.stream_name,
            group = %config.consumer_group,
            consumer = %config.consumer_name,
            "Redis connection established"
        );

        Ok(Self {
            connection,
            blocking_connection,
            config,
            admit_script: Script::new(ADMIT_SCRIPT),
            schedule_script: Script::new(SCHEDULE_SCRIPT),
            promote_script: Script::new(PROMOTE_SCRIPT),
            rate_limit_script: Script::new(RATE_LIMIT_SCRIPT),
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    async fn append_record(&self, record: &str) -> Result<String, AppError> {
        let mut conn = self.connection.clone();
        let id: String = conn
            .xadd(&self.config.stream_name, "*", &[("data", record)])
            .await?;
        Ok(id)
    }

    fn parse_entry(&self, entry: &StreamId) -> Option<Event> {
        let record: String = entry.get("data")?;
        match Event::from_record(&record) {
            Ok(mut event) => {
                event.delivery_handle = Some(entry.id.clone());
                Some(event)
            }
            Err(e) => {
                warn!(
                    delivery_handle = %entry.id,
                    error = %e,
                    "Skipping unreadable queue entry"
                );
                None
            }
        }
    }
}

impl EventStore for RedisStore {
    async fn open(&self) -> Result<(), AppError> {
        let mut conn = self.connection.clone();

        let created: Result<(), redis::RedisError> = conn
            .xgroup_create_mkstream(&self.config.stream_name, &self.config.consumer_group, "0")
            .await;

        match created {
            Ok(()) => {
                info!(group = %self.config.consumer_group, "Consumer group created");
                Ok(())
            }
            Err(e) if e.code() == Some("BUSYGROUP") => {
                debug!(group = %self.config.consumer_group, "Consumer group already exists");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn admit(&self, event: &Event) -> Result<bool, AppError> {
        let mut conn = self.connection.clone();
        let record = event.to_record()?;

        let admitted: i64 = self
            .admit_script
            .key(dedup_key(&event.event_id))
            .key(&self.config.stream_name)
            .key(Metric::Received.key())
            .key(Metric::Deduped.key())
            .arg(record)
            .arg(self.config.dedup_ttl.as_secs())
            .invoke_async(&mut conn)
            .await?;

        Ok(admitted == 1)
    }

    async fn lookup(&self, event_id: &str) -> Result<Option<Event>, AppError> {
        let mut conn = self.connection.clone();
        let record: Option<String> = conn.get(dedup_key(event_id)).await?;

        record
            .map(|r| Event::from_record(&r))
            .transpose()
            .map_err(AppError::from)
    }

    async fn append(&self, event: &Event) -> Result<String, AppError> {
        self.append_record(&event.to_record()?).await
    }

    async fn checkout(&self, max_items: usize, block: Duration) -> Result<Vec<Event>, AppError> {
        let mut conn = self.blocking_connection.clone();

        let options = StreamReadOptions::default()
            .group(&self.config.consumer_group, &self.config.consumer_name)
            .count(max_items)
            .block(block.as_millis().max(1) as usize);

        let reply: Option<StreamReadReply> = conn
            .xread_options(&[&self.config.stream_name], &[">"], &options)
            .await?;

        let Some(reply) = reply else {
            return Ok(Vec::new());
        };

        let mut events = Vec::new();
        for key in reply.keys {
            for entry in key.ids {
                match self.parse_entry(&entry) {
                    Some(event) => events.push(event),
                    None => self.ack(&entry.id).await?,
                }
            }
        }

        Ok(events)
    }

    async fn ack(&self, delivery_handle: &str) -> Result<(), AppError> {
        let mut conn = self.connection.clone();
        let _: i64 = conn
            .xack(
                &self.config.stream_name,
                &self.config.consumer_group,
                &[delivery_handle],
            )
            .await?;
        Ok(())
    }

    async fn move_to_dead_letter(&self, event: &Event) -> Result<(), AppError> {
        let mut conn = self.connection.clone();
        let record = event.dead_lettered(event.retry_count).to_record()?;

        redis::pipe()
            .atomic()
            .lpush(&self.config.dlq_name, record)
            .ignore()
            .incr(Metric::Dlq.key(), 1)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;

        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<Event>, AppError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut conn = self.connection.clone();

        let range: StreamRangeReply = conn
            .xrevrange_count(&self.config.stream_name, "+", "-", limit)
            .await?;
        let queued: Vec<Event> = range
            .ids
            .iter()
            .filter_map(|entry| self.parse_entry(entry))
            .collect();

        let records: Vec<String> = conn
            .lrange(&self.config.dlq_name, 0, limit as isize - 1)
            .await?;
        let dead: Vec<Event> = records
            .iter()
            .filter_map(|r| Event::from_record(r).ok())
            .collect();

        Ok(merge_recent(queued, dead, limit))
    }

    async fn replay(&self, event_id: &str) -> Result<bool, AppError> {
        let Some(event) = self.lookup(event_id).await? else {
            return Ok(false);
        };

        let handle = self.append(&event.requeued(0)).await?;
        info!(event_id, delivery_handle = %handle, "Event replayed");

        Ok(true)
    }

    async fn schedule_retry(&self, event: &Event, due_at_ms: i64) -> Result<(), AppError> {
        let mut conn = self.connection.clone();
        let record = event.to_record()?;

        let _: i64 = self
            .schedule_script
            .key(&self.config.retry_set_name)
            .key(retry_sequence_key(&self.config.retry_set_name))
            .arg(record)
            .arg(due_at_ms)
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn promote_due_retries(&self, now_ms: i64) -> Result<usize, AppError> {
        let mut conn = self.connection.clone();

        let promoted: i64 = self
            .promote_script
            .key(&self.config.retry_set_name)
            .key(&self.config.stream_name)
            .arg(now_ms)
            .invoke_async(&mut conn)
            .await?;

        Ok(promoted.max(0) as usize)
    }

    async fn incr_metric(&self, metric: Metric) -> Result<(), AppError> {
        let mut conn = self.connection.clone();
        conn.incr::<_, _, ()>(metric.key(), 1).await?;
        Ok(())
    }

    async fn metrics(&self) -> Result<MetricsSnapshot, AppError> {
        let mut conn = self.connection.clone();
        let keys: Vec<String> = Metric::ALL.iter().map(Metric::key).collect();
        let values: Vec<Option<u64>> = conn.mget(&keys).await?;

        let mut snapshot = MetricsSnapshot::default();
        for (metric, value) in Metric::ALL.iter().zip(values) {
            snapshot.set(*metric, value.unwrap_or(0));
        }

        Ok(snapshot)
    }

    async fn incr_rate_limit(&self, client_key: &str, window: Duration) -> Result<u64, AppError> {
        let mut conn = self.connection.clone();

        let count: u64 = self
            .rate_limit_script
            .key(rate_limit_key(client_key))
            .arg(window.as_secs().max(1))
            .invoke_async(&mut conn)
            .await?;

        Ok(count)
    }

    async fn get_token(&self, user_id: &str) -> Result<Option<String>, AppError> {
        let mut conn = self.connection.clone();
        let token: Option<String> = conn.get(token_key(user_id)).await?;
        Ok(token)
    }

    async fn set_token(&self, user_id: &str, token: &str) -> Result<(), AppError> {
        let mut conn = self.connection.clone();
        conn.set::<_, _, ()>(token_key(user_id), token).await?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), AppError> {
        let mut conn = self.connection.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}
