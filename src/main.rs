use anyhow::{Error, Result, anyhow};
use order_relay::{api::run_api_server, config::Config, utils::init_tracing};

#[tokio::main]
async fn main() -> Result<(), Error> {
    let config = Config::load()?;
    init_tracing(&config.log_format);

    let _ = rustls::crypto::ring::default_provider().install_default();

    run_api_server(config)
        .await
        .map_err(|e| anyhow!("Webhook server failed: {}", e))
}
