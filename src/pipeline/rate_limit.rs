use std::time::Duration;

use tracing::debug;

use crate::{clients::store::EventStore, error::AppError};

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub max_requests: u64,
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 10,
            window: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u64,
}

/// Fixed-window request cap per client key. Each key's window opens on its
/// first request after the previous one expired.
#[derive(Clone)]
pub struct RateLimiter<S> {
    store: S,
    config: RateLimitConfig,
}

impl<S: EventStore> RateLimiter<S> {
    pub fn new(store: S, config: RateLimitConfig) -> Self {
        Self { store, config }
    }

    pub async fn check(&self, client_key: &str) -> Result<RateLimitDecision, AppError> {
        let count = self
            .store
            .incr_rate_limit(client_key, self.config.window)
            .await?;

        let decision = RateLimitDecision {
            allowed: count <= self.config.max_requests,
            remaining: self.config.max_requests.saturating_sub(count),
        };

        if !decision.allowed {
            debug!(client_key, count, "Rate limit exceeded");
        }

        Ok(decision)
    }
}
