use std::time::Duration;

use anyhow::{Error, Result};
use order_relay::{
    clients::{fcm::FcmClient, redis::RedisStore, store::EventStore},
    config::Config,
    pipeline::worker::Worker,
    utils::{init_tracing, shutdown_signal},
};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Error> {
    let config = Config::load()?;
    init_tracing(&config.log_format);

    let _ = rustls::crypto::ring::default_provider().install_default();

    let store = RedisStore::connect(&config.redis_url, config.store_config()).await?;
    store.open().await?;

    let notifier = FcmClient::new(&config)?;
    let worker = Worker::new(store, notifier, config.worker_config());

    let running = worker.shutdown_handle();
    let grace = Duration::from_millis(config.shutdown_grace_ms);

    let shutdown = shutdown_signal()?;

    tokio::spawn(async move {
        let name = shutdown.await;

        info!(signal = name, "Received shutdown signal, shutting down gracefully...");
        running.store(false, std::sync::atomic::Ordering::SeqCst);

        tokio::time::sleep(grace).await;
        info!("Grace period elapsed, exiting");
        std::process::exit(0);
    });

    worker.run().await;

    Ok(())
}
