use std::future::Future;

use chrono::Utc;
use tokio::signal::unix::{SignalKind, signal};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "order_relay=info,order_relay_worker=info,tower_http=info";

/// Installs the global tracing subscriber. `RUST_LOG` overrides the default
/// filter; `format = "json"` switches to JSON lines.
pub fn init_tracing(format: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let result = if format.eq_ignore_ascii_case("json") {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    if let Err(e) = result {
        eprintln!("Tracing subscriber already installed: {}", e);
    }
}

/// Resolves with the signal name on SIGINT or SIGTERM. Both handlers are
/// installed before this returns.
pub fn shutdown_signal() -> std::io::Result<impl Future<Output = &'static str>> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    Ok(async move {
        tokio::select! {
            _ = sigint.recv() => "SIGINT",
            _ = sigterm.recv() => "SIGTERM",
        }
    })
}

pub fn unix_seconds() -> i64 {
    Utc::now().timestamp()
}

pub fn unix_millis() -> i64 {
    Utc::now().timestamp_millis()
}
