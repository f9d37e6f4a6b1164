use axum::http::HeaderMap;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

use crate::{
    clients::store::EventStore,
    error::AppError,
    models::event::Event,
    pipeline::{
        rate_limit::{RateLimitConfig, RateLimiter},
        signature::{verify_freshness, verify_signature},
    },
    utils::unix_seconds,
};

pub const SIGNATURE_HEADER: &str = "x-signature";
pub const TIMESTAMP_HEADER: &str = "x-timestamp";
pub const DEFAULT_CLIENT_KEY: &str = "127.0.0.1";

#[derive(Debug, Clone, Default)]
pub struct WebhookHeaders {
    pub signature: Option<String>,
    pub timestamp: Option<String>,
}

impl WebhookHeaders {
    pub fn from_header_map(headers: &HeaderMap) -> Self {
        Self {
            signature: header_str(headers, SIGNATURE_HEADER),
            timestamp: header_str(headers, TIMESTAMP_HEADER),
        }
    }
}

/// Rate-limit key for a request: the first `X-Forwarded-For` hop, then
/// `X-Real-Ip`, then loopback.
pub fn client_key(headers: &HeaderMap) -> String {
    header_str(headers, "x-forwarded-for")
        .and_then(|v| v.split(',').next().map(|s| s.trim().to_string()))
        .filter(|s| !s.is_empty())
        .or_else(|| header_str(headers, "x-real-ip"))
        .unwrap_or_else(|| DEFAULT_CLIENT_KEY.to_string())
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestOutcome {
    pub event_id: String,
    pub duplicate: bool,
}

#[derive(Debug, Deserialize)]
struct WebhookBody {
    #[serde(default)]
    event_id: Option<String>,

    #[serde(default, rename = "type", alias = "event_type")]
    event_type: Option<String>,

    #[serde(default, rename = "data", alias = "payload")]
    payload: Option<JsonValue>,
}

#[derive(Clone)]
pub struct Ingestor<S> {
    store: S,
    limiter: RateLimiter<S>,
    secret: Vec<u8>,
    max_age_seconds: i64,
}

impl<S: EventStore> Ingestor<S> {
    pub fn new(
        store: S,
        rate_limit: RateLimitConfig,
        secret: impl AsRef<[u8]>,
        max_age_seconds: i64,
    ) -> Self {
        Self {
            limiter: RateLimiter::new(store.clone(), rate_limit),
            store,
            secret: secret.as_ref().to_vec(),
            max_age_seconds,
        }
    }

    pub async fn ingest(
        &self,
        raw_body: &[u8],
        headers: &WebhookHeaders,
        client_key: &str,
    ) -> Result<IngestOutcome, AppError> {
        self.ingest_at(raw_body, headers, client_key, unix_seconds())
            .await
    }

    /// Runs the checks in order and stops at the first failure: rate limit,
    /// headers, freshness, signature, JSON, required fields, then admission.
    pub async fn ingest_at(
        &self,
        raw_body: &[u8],
        headers: &WebhookHeaders,
        client_key: &str,
        now: i64,
    ) -> Result<IngestOutcome, AppError> {
        let decision = self.limiter.check(client_key).await?;
        if !decision.allowed {
            return Err(AppError::RateLimited {
                remaining: decision.remaining,
            });
        }

        let (Some(signature), Some(timestamp)) = (&headers.signature, &headers.timestamp) else {
            return Err(AppError::BadRequest("Missing required headers".to_string()));
        };

        if !verify_freshness(timestamp, now, self.max_age_seconds) {
            debug!(client_key, timestamp = %timestamp, "Rejected stale webhook");
            return Err(AppError::Stale);
        }

        if !verify_signature(raw_body, signature, &self.secret) {
            warn!(client_key, "Rejected webhook with invalid signature");
            return Err(AppError::Unauthorized);
        }

        let value: JsonValue = serde_json::from_slice(raw_body)
            .map_err(|_| AppError::BadRequest("Invalid JSON".to_string()))?;

        let missing = || AppError::BadRequest("Missing required fields".to_string());
        let body: WebhookBody = serde_json::from_value(value).map_err(|_| missing())?;

        let event_id = body.event_id.filter(|s| !s.is_empty()).ok_or_else(missing)?;
        let event_type = body.event_type.filter(|s| !s.is_empty()).ok_or_else(missing)?;
        let payload = body
            .payload
            .filter(|p| p.as_object().is_some_and(|o| !o.is_empty()))
            .ok_or_else(missing)?;

        let received_at = timestamp
            .trim()
            .parse::<i64>()
            .map_err(|_| AppError::Stale)?;

        let event = Event::new(event_id, event_type, payload, received_at);
        let admitted = self.store.admit(&event).await?;

        info!(
            event_id = %event.event_id,
            event_type = %event.event_type,
            duplicate = !admitted,
            "Webhook event ingested"
        );

        Ok(IngestOutcome {
            event_id: event.event_id,
            duplicate: !admitted,
        })
    }
}
