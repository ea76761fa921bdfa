use std::{collections::BTreeSet, fmt::Display};

use anyhow::Error;
use futures_util::{FutureExt, Stream, StreamExt};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::{
    error::DecodeError,
    feed::FeedSender,
    models::{
        death,
        redrive::{DeadLetter, RedriveItem},
        status::DrainDecision,
    },
    worker::shutdown_requested,
};

/// Pulls dead letters off the delivery stream, keeps the ones whose original
/// routing key is allow-listed and hands them to the Redriver.
pub struct Drainer<D> {
    allowed_routing_keys: BTreeSet<String>,
    feed: FeedSender<D>,
}

impl<D: DeadLetter> Drainer<D> {
    pub fn new(allowed_routing_keys: BTreeSet<String>, feed: FeedSender<D>) -> Self {
        Self {
            allowed_routing_keys,
            feed,
        }
    }

    /// Runs until the delivery stream ends, fails, or shutdown is signalled.
    /// Dropping `self` on return closes the feed for the Redriver.
    ///
    /// On shutdown, deliveries the consumer already buffered are rejected
    /// with requeue instead of being dropped with the stream.
    pub async fn run<S, E>(self, mut deliveries: S, mut shutdown: watch::Receiver<bool>)
    where
        S: Stream<Item = Result<D, E>> + Unpin,
        E: Display,
    {
        info!(
            routing_keys = ?self.allowed_routing_keys,
            "Draining dead-letter queue"
        );

        let interrupted = loop {
            let delivery = tokio::select! {
                biased;
                _ = shutdown_requested(&mut shutdown) => {
                    info!("Drainer received shutdown signal");
                    break true;
                }
                next = deliveries.next() => match next {
                    Some(Ok(delivery)) => delivery,
                    Some(Err(e)) => {
                        error!(error = %e, "Dead-letter delivery stream failed");
                        break false;
                    }
                    None => {
                        info!("Dead-letter delivery stream closed");
                        break false;
                    }
                },
            };

            if self.handle(delivery, &mut shutdown).await == DrainDecision::Requeued {
                break true;
            }
        };

        if interrupted {
            while let Some(Some(Ok(delivery))) = deliveries.next().now_or_never() {
                return_to_broker(delivery).await;
            }
        }

        info!("Drainer stopped");
    }

    async fn handle(&self, delivery: D, shutdown: &mut watch::Receiver<bool>) -> DrainDecision {
        let delivery_tag = delivery.delivery_tag();

        let decoded = death::decode(delivery.headers()).and_then(|record| {
            let routing_key = record
                .routing_key()
                .map(str::to_string)
                .ok_or(DecodeError::NoStringRoutingKey)?;
            Ok((record, routing_key))
        });

        let (record, routing_key) = match decoded {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(
                    delivery_tag,
                    error = %e,
                    "Dead-letter metadata could not be decoded, rejecting without requeue"
                );
                log_resolution(delivery.reject(false).await, delivery_tag, "reject");
                return DrainDecision::Undecodable;
            }
        };

        if !self.allowed_routing_keys.contains(&routing_key) {
            info!(
                delivery_tag,
                routing_key = %routing_key,
                "Routing key not in allow-list, rejecting without requeue"
            );
            log_resolution(delivery.reject(false).await, delivery_tag, "reject");
            return DrainDecision::Filtered;
        }

        info!(
            delivery_tag,
            exchange = %record.original_exchange,
            routing_key = %routing_key,
            dead_lettered_from = ?record.queue,
            reason = ?record.reason,
            count = ?record.count,
            "Accepted dead letter for redrive"
        );

        let item = RedriveItem {
            message: delivery,
            target_exchange: record.original_exchange,
            target_routing_key: routing_key,
        };

        let slot = tokio::select! {
            biased;
            _ = shutdown_requested(shutdown) => None,
            slot = self.feed.reserve() => slot,
        };

        match slot {
            Some(slot) => {
                slot.fill(item);
                DrainDecision::Accepted
            }
            None => {
                return_to_broker(item.message).await;
                DrainDecision::Requeued
            }
        }
    }
}

/// Hands a delivery that will not be redriven in this run back to the broker.
pub(crate) async fn return_to_broker<D: DeadLetter>(delivery: D) {
    let delivery_tag = delivery.delivery_tag();
    warn!(
        delivery_tag,
        "Dead letter not redriven before shutdown, rejecting with requeue"
    );
    log_resolution(delivery.reject(true).await, delivery_tag, "nack");
}

pub(crate) fn log_resolution(result: Result<(), Error>, delivery_tag: u64, action: &str) {
    if let Err(e) = result {
        error!(delivery_tag, action, error = %e, "Failed to resolve dead letter");
    }
}
