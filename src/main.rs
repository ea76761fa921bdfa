use anyhow::{Error, Result};
use dlq_redriver::{config::Config, worker};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Program started");

    let config = Config::load()
        .inspect_err(|e| error!(error = %e, "Program is not configured correctly"))?;

    info!(
        queue = %config.dlq_name,
        routing_keys = ?config.routing_keys,
        "Configuration validated"
    );

    worker::run(config)
        .await
        .inspect_err(|e| error!(error = %e, "Redriver stopped with an error"))?;

    info!("Program ended");

    Ok(())
}
