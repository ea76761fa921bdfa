use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::{sync::watch, time::timeout};
use tracing::{info, warn};

use crate::{
    drainer::{log_resolution, return_to_broker},
    error::PublishError,
    feed::FeedReceiver,
    models::{
        redrive::{DeadLetter, RedriveItem},
        status::RedriveOutcome,
    },
    worker::shutdown_requested,
};

#[async_trait]
pub trait Publisher: Send + Sync + 'static {
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
    ) -> Result<(), PublishError>;
}

/// Republishes accepted dead letters one at a time and resolves each of them
/// according to the publish outcome.
pub struct Redriver<D, P> {
    feed: FeedReceiver<D>,
    publisher: Arc<P>,
    publish_timeout: Duration,
}

impl<D: DeadLetter, P: Publisher> Redriver<D, P> {
    pub fn new(feed: FeedReceiver<D>, publisher: Arc<P>, publish_timeout: Duration) -> Self {
        Self {
            feed,
            publisher,
            publish_timeout,
        }
    }

    /// Runs until every feed sender is dropped or shutdown is signalled.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        loop {
            let item = tokio::select! {
                biased;
                _ = shutdown_requested(&mut shutdown) => {
                    info!("Redriver received shutdown signal");
                    break;
                }
                item = self.feed.pop() => match item {
                    Some(item) => item,
                    None => {
                        info!("Redrive feed closed");
                        break;
                    }
                },
            };

            self.redrive(item).await;
        }

        // A slot the Drainer reserved before the close can still be filled;
        // `pop` waits for it rather than dropping the item with the receiver.
        self.feed.close();
        while let Some(item) = self.feed.pop().await {
            return_to_broker(item.message).await;
        }

        info!("Redriver stopped");
    }

    /// Publishes one item under its own timeout, then acks on success or
    /// rejects with requeue on any failure.
    pub async fn redrive(&self, item: RedriveItem<D>) -> RedriveOutcome {
        let RedriveItem {
            message,
            target_exchange,
            target_routing_key,
        } = item;
        let delivery_tag = message.delivery_tag();

        info!(
            delivery_tag,
            exchange = %target_exchange,
            routing_key = %target_routing_key,
            "Publishing message"
        );

        let published = match timeout(
            self.publish_timeout,
            self.publisher
                .publish(&target_exchange, &target_routing_key, message.body()),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(PublishError::Timeout(self.publish_timeout)),
        };

        match published {
            Ok(()) => {
                info!(
                    delivery_tag,
                    routing_key = %target_routing_key,
                    "Message published successfully"
                );
                log_resolution(message.acknowledge().await, delivery_tag, "ack");
                RedriveOutcome::Acked
            }
            Err(e) => {
                warn!(
                    delivery_tag,
                    routing_key = %target_routing_key,
                    error_kind = e.kind(),
                    error = %e,
                    "Publish failed, rejecting with requeue"
                );
                log_resolution(message.reject(true).await, delivery_tag, "nack");
                RedriveOutcome::Requeued
            }
        }
    }
}
