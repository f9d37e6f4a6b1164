use std::time::Instant;

use chrono::Utc;
use tracing::{debug, warn};

use crate::{clients::store::EventStore, models::health::HealthCheckResponse};

pub struct HealthChecker<S> {
    store: S,
}

impl<S: EventStore> HealthChecker<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub async fn check(&self) -> HealthCheckResponse {
        let start = Instant::now();
        let timestamp = Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true);

        match self.store.ping().await {
            Ok(()) => {
                let elapsed = start.elapsed().as_millis() as u64;
                debug!(response_time_ms = elapsed, "Store health check passed");
                HealthCheckResponse::up(timestamp, elapsed)
            }
            Err(e) => {
                warn!(error = %e, "Store health check failed");
                HealthCheckResponse::down(timestamp, e.to_string())
            }
        }
    }
}
