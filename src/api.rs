use std::{sync::Arc, time::Instant};

use anyhow::{Error, Result};
use axum::{
    Router,
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json},
    routing::{get, post},
};
use chrono::{SecondsFormat, Utc};
use serde::Deserialize;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{
    clients::{health::HealthChecker, redis::RedisStore, store::EventStore},
    config::Config,
    error::AppError,
    models::{
        event::Event,
        response::{
            ActionResponse, MetricsResponse, RegisterTokenRequest, ReplayRequest, WebhookResponse,
        },
    },
    pipeline::ingest::{Ingestor, WebhookHeaders, client_key},
    utils::shutdown_signal,
};

const DEFAULT_RECENT_LIMIT: usize = 20;
const MAX_RECENT_LIMIT: usize = 200;

pub struct AppState<S> {
    pub store: S,
    pub ingestor: Ingestor<S>,
    pub health_checker: HealthChecker<S>,
}

impl<S: EventStore> AppState<S> {
    pub fn new(store: S, ingestor: Ingestor<S>) -> Self {
        Self {
            health_checker: HealthChecker::new(store.clone()),
            ingestor,
            store,
        }
    }

    pub fn from_config(store: S, config: &Config) -> Self {
        let ingestor = Ingestor::new(
            store.clone(),
            config.rate_limit_config(),
            &config.webhook_secret,
            config.max_event_age_seconds,
        );
        Self::new(store, ingestor)
    }
}

pub fn create_router<S: EventStore>(state: Arc<AppState<S>>) -> Router {
    Router::new()
        .route("/api/webhook/order.created", post(receive_webhook::<S>))
        .route("/api/admin/events", get(recent_events::<S>))
        .route("/api/admin/replay", post(replay_event::<S>))
        .route("/api/metrics", get(metrics::<S>))
        .route("/api/health", get(health_check::<S>))
        .route("/api/tokens", post(register_token::<S>))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_api_server(config: Config) -> Result<(), Error> {
    let store = RedisStore::connect(&config.redis_url, config.store_config()).await?;
    store.open().await?;

    let state = Arc::new(AppState::from_config(store, &config));
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", config.server_port);
    let listener = TcpListener::bind(&addr).await?;

    let shutdown = shutdown_signal()?;

    info!(address = %addr, "Webhook server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let name = shutdown.await;
            info!(signal = name, "Shutdown signal received, draining connections");
        })
        .await?;

    Ok(())
}

async fn receive_webhook<S: EventStore>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>, AppError> {
    let start = Instant::now();

    let outcome = state
        .ingestor
        .ingest(
            &body,
            &WebhookHeaders::from_header_map(&headers),
            &client_key(&headers),
        )
        .await?;

    let processing_time_ms = start.elapsed().as_millis() as u64;
    info!(
        event_id = %outcome.event_id,
        duplicate = outcome.duplicate,
        processing_time_ms,
        "Webhook processed"
    );

    Ok(Json(WebhookResponse {
        success: true,
        event_id: outcome.event_id,
        duplicate: outcome.duplicate,
        processing_time_ms,
    }))
}

#[derive(Debug, Deserialize)]
struct RecentQuery {
    limit: Option<usize>,
}

async fn recent_events<S: EventStore>(
    State(state): State<Arc<AppState<S>>>,
    Query(query): Query<RecentQuery>,
) -> Result<Json<Vec<Event>>, AppError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_RECENT_LIMIT)
        .min(MAX_RECENT_LIMIT);

    let events = state.store.recent(limit).await?;
    Ok(Json(events))
}

async fn replay_event<S: EventStore>(
    State(state): State<Arc<AppState<S>>>,
    Json(request): Json<ReplayRequest>,
) -> Result<Json<ActionResponse>, AppError> {
    let event_id = request
        .event_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| AppError::BadRequest("event_id is required".to_string()))?;

    if state.store.replay(&event_id).await? {
        info!(event_id = %event_id, "Replay requested");
        Ok(Json(ActionResponse::success("Event replayed successfully")))
    } else {
        Err(AppError::NotFound("Event not found".to_string()))
    }
}

async fn metrics<S: EventStore>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<Json<MetricsResponse>, AppError> {
    let counters = state.store.metrics().await?;

    Ok(Json(MetricsResponse {
        counters,
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    }))
}

async fn health_check<S: EventStore>(State(state): State<Arc<AppState<S>>>) -> impl IntoResponse {
    let health = state.health_checker.check().await;

    let status_code = if health.ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(health))
}

async fn register_token<S: EventStore>(
    State(state): State<Arc<AppState<S>>>,
    Json(request): Json<RegisterTokenRequest>,
) -> Result<Json<ActionResponse>, AppError> {
    if request.user_id.is_empty() || request.token.is_empty() {
        return Err(AppError::BadRequest(
            "user_id and token are required".to_string(),
        ));
    }

    state
        .store
        .set_token(&request.user_id, &request.token)
        .await?;

    info!(user_id = %request.user_id, "Notification token registered");
    Ok(Json(ActionResponse::success("Token registered")))
}
