use std::time::Duration;

use anyhow::{Error, Result, anyhow};
use dotenvy::dotenv;
use serde::Deserialize;

use crate::{
    clients::store::StoreConfig,
    models::retry::RetryPolicy,
    pipeline::{rate_limit::RateLimitConfig, worker::WorkerConfig},
};

#[derive(Clone, Deserialize, Debug)]
pub struct Config {
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    #[serde(default = "default_stream_name")]
    pub stream_name: String,
    #[serde(default = "default_dlq_name")]
    pub dlq_name: String,
    #[serde(default = "default_retry_set_name")]
    pub retry_set_name: String,
    #[serde(default = "default_consumer_group")]
    pub consumer_group: String,
    #[serde(default = "default_consumer_name")]
    pub consumer_name: String,
    #[serde(default = "default_dedup_ttl_seconds")]
    pub dedup_ttl_seconds: u64,

    pub webhook_secret: String,
    #[serde(default = "default_max_event_age_seconds")]
    pub max_event_age_seconds: i64,

    #[serde(default = "default_rate_limit_window_seconds")]
    pub rate_limit_window_seconds: u64,
    #[serde(default = "default_rate_limit_max_requests")]
    pub rate_limit_max_requests: u64,

    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,
    #[serde(default = "default_retry_backoff_seconds")]
    pub retry_backoff_seconds: Vec<u64>,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_block_timeout_ms")]
    pub block_timeout_ms: u64,
    #[serde(default = "default_error_pause_ms")]
    pub error_pause_ms: u64,
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,

    #[serde(default = "default_notification_topic")]
    pub notification_topic: String,
    #[serde(default)]
    pub fcm_project_id: String,
    #[serde(default = "default_fcm_base_url")]
    pub fcm_base_url: String,
    #[serde(default)]
    pub fcm_access_token: Option<String>,
    #[serde(default)]
    pub fcm_dry_run: bool,

    #[serde(default = "default_server_port")]
    pub server_port: u16,
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Config {
    pub fn load() -> Result<Self, Error> {
        dotenv().ok();

        let config = envy::from_env::<Self>()
            .map_err(|e| anyhow!("Invalid or missing environmental variable: {}", e))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.retry_backoff_seconds.is_empty() {
            return Err(anyhow!("RETRY_BACKOFF_SECONDS must list at least one delay"));
        }
        if self.max_retry_attempts == 0 {
            return Err(anyhow!("MAX_RETRY_ATTEMPTS must be at least 1"));
        }
        // Redis reads BLOCK 0 as "wait forever".
        if self.block_timeout_ms == 0 {
            return Err(anyhow!("BLOCK_TIMEOUT_MS must be at least 1"));
        }

        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retry_attempts,
            backoff: self
                .retry_backoff_seconds
                .iter()
                .map(|s| Duration::from_secs(*s))
                .collect(),
        }
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            stream_name: self.stream_name.clone(),
            dlq_name: self.dlq_name.clone(),
            retry_set_name: self.retry_set_name.clone(),
            consumer_group: self.consumer_group.clone(),
            consumer_name: self.consumer_name.clone(),
            dedup_ttl: Duration::from_secs(self.dedup_ttl_seconds),
        }
    }

    pub fn rate_limit_config(&self) -> RateLimitConfig {
        RateLimitConfig {
            max_requests: self.rate_limit_max_requests,
            window: Duration::from_secs(self.rate_limit_window_seconds),
        }
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            batch_size: self.batch_size,
            block_timeout: Duration::from_millis(self.block_timeout_ms),
            error_pause: Duration::from_millis(self.error_pause_ms),
            default_topic: self.notification_topic.clone(),
            retry_policy: self.retry_policy(),
        }
    }
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_stream_name() -> String {
    "orders-stream".to_string()
}

fn default_dlq_name() -> String {
    "orders-dlq".to_string()
}

fn default_retry_set_name() -> String {
    "orders-retry".to_string()
}

fn default_consumer_group() -> String {
    "workers".to_string()
}

fn default_consumer_name() -> String {
    "worker-1".to_string()
}

fn default_dedup_ttl_seconds() -> u64 {
    24 * 60 * 60
}

fn default_max_event_age_seconds() -> i64 {
    5 * 60
}

fn default_rate_limit_window_seconds() -> u64 {
    10
}

fn default_rate_limit_max_requests() -> u64 {
    10
}

fn default_max_retry_attempts() -> u32 {
    3
}

fn default_retry_backoff_seconds() -> Vec<u64> {
    vec![1, 4, 10]
}

fn default_batch_size() -> usize {
    1
}

fn default_block_timeout_ms() -> u64 {
    1000
}

fn default_error_pause_ms() -> u64 {
    5000
}

fn default_shutdown_grace_ms() -> u64 {
    2000
}

fn default_notification_topic() -> String {
    "orders".to_string()
}

fn default_fcm_base_url() -> String {
    "https://fcm.googleapis.com".to_string()
}

fn default_server_port() -> u16 {
    3000
}

fn default_log_format() -> String {
    "pretty".to_string()
}
