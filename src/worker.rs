use std::sync::Arc;

use anyhow::{Error, Result, anyhow};
use tokio::{
    signal::unix::{SignalKind, signal},
    sync::watch,
    time::timeout,
};
use tracing::{error, info, warn};

use crate::{
    clients::rbmq::RabbitMqClient, config::Config, drainer::Drainer, feed, redriver::Redriver,
};

/// Connects, runs the Drainer and Redriver until SIGINT/SIGTERM, then releases
/// the broker connection.
///
/// Returns an error if the dead-letter consumer stops on its own, since that
/// means the broker went away under us.
pub async fn run(config: Config) -> Result<(), Error> {
    let mut sigterm = signal(SignalKind::terminate())?;

    let client = Arc::new(RabbitMqClient::connect(&config).await?);
    let deliveries = client.create_consumer().await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (feed_tx, feed_rx) = feed::bounded();

    let drainer = Drainer::new(config.routing_keys.clone(), feed_tx);
    let redriver = Redriver::new(feed_rx, Arc::clone(&client), config.publish_timeout());

    let mut drain_task = tokio::spawn(drainer.run(deliveries, shutdown_rx.clone()));
    let redrive_task = tokio::spawn(redriver.run(shutdown_rx));

    let consumer_ended = tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            info!(signal = "SIGINT", "Received signal");
            false
        }
        _ = sigterm.recv() => {
            info!(signal = "SIGTERM", "Received signal");
            false
        }
        _ = &mut drain_task => {
            warn!("Dead-letter consumer stopped before shutdown was requested");
            true
        }
    };

    if !consumer_ended {
        let _ = shutdown_tx.send(true);
    }

    let stopped = timeout(config.shutdown_grace(), async {
        if !consumer_ended {
            let _ = drain_task.await;
        }
        let _ = redrive_task.await;
    })
    .await;

    if stopped.is_err() {
        warn!(
            grace_ms = config.shutdown_grace_ms,
            "Workers did not stop within the shutdown grace period, in-flight messages will be redelivered"
        );
    }

    if let Err(e) = client.close().await {
        error!(error = %e, "Failed to release RabbitMQ connection");
    }

    if consumer_ended {
        return Err(anyhow!("Dead-letter consumer stopped unexpectedly"));
    }

    Ok(())
}

/// Resolves once shutdown is signalled or the signalling side is gone.
pub(crate) async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}
