use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use lapin::{
    BasicProperties, Channel, Connection, ConnectionProperties,
    message::Delivery,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
        BasicRejectOptions, ConfirmSelectOptions, QueueDeclareOptions,
    },
    publisher_confirm::Confirmation,
    types::FieldTable,
};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::{
    config::Config,
    error::{ConnectionError, PublishError},
    models::redrive::DeadLetter,
    redriver::Publisher,
};

/// Consumes on one channel and republishes on another, so a channel-level
/// error raised by a publish (unknown exchange, for instance) cannot take the
/// consumer down with it.
pub struct RabbitMqClient {
    connection: Connection,
    channel: Channel,
    publish_channel: Mutex<Channel>,
    dlq_name: String,
    consumer_tag: String,
    publisher_confirms: bool,
}

impl RabbitMqClient {
    pub async fn connect(config: &Config) -> Result<Self, ConnectionError> {
        info!("Connecting to RabbitMQ...");

        let connection = Connection::connect(&config.rabbitmq_url, ConnectionProperties::default())
            .await
            .map_err(ConnectionError::Connect)?;

        info!("RabbitMQ connection established");

        let channel = connection
            .create_channel()
            .await
            .map_err(ConnectionError::Channel)?;

        channel
            .basic_qos(config.prefetch_count, BasicQosOptions::default())
            .await
            .map_err(ConnectionError::Qos)?;

        info!(prefetch_count = config.prefetch_count, "Prefetch count set");

        // Lets the redriver run against a bare local broker; deployed brokers
        // already have the queue and this is a no-op there.
        if config.declare_queue {
            channel
                .queue_declare(
                    &config.dlq_name,
                    QueueDeclareOptions {
                        durable: true,
                        ..Default::default()
                    },
                    FieldTable::default(),
                )
                .await
                .map_err(|source| ConnectionError::Declare {
                    queue: config.dlq_name.clone(),
                    source,
                })?;

            info!(queue = %config.dlq_name, "Dead-letter queue declared");
        }

        let publish_channel = open_publish_channel(&connection, config.publisher_confirms).await?;

        if config.publisher_confirms {
            info!("Publisher confirms enabled");
        }

        Ok(Self {
            connection,
            channel,
            publish_channel: Mutex::new(publish_channel),
            dlq_name: config.dlq_name.clone(),
            consumer_tag: config.consumer_tag.clone(),
            publisher_confirms: config.publisher_confirms,
        })
    }

    /// Manual-ack, non-exclusive consumer on the dead-letter queue.
    pub async fn create_consumer(
        &self,
    ) -> Result<impl Stream<Item = Result<DlqDelivery, lapin::Error>> + Send + Unpin + use<>, ConnectionError>
    {
        let consumer = self
            .channel
            .basic_consume(
                &self.dlq_name,
                &self.consumer_tag,
                BasicConsumeOptions {
                    no_ack: false,
                    exclusive: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|source| ConnectionError::Consume {
                queue: self.dlq_name.clone(),
                source,
            })?;

        info!(
            queue = %self.dlq_name,
            consumer_tag = %self.consumer_tag,
            "Consumer created for dead-letter queue"
        );

        Ok(consumer.map(|delivery| delivery.map(DlqDelivery)))
    }

    pub async fn close(&self) -> Result<(), Error> {
        let publish_channel = self.publish_channel.lock().await;
        if publish_channel.status().connected() {
            if let Err(e) = publish_channel.close(200, "dlq redriver shutting down").await {
                warn!(error = %e, "Failed to close RabbitMQ publish channel");
            }
        }

        self.channel
            .close(200, "dlq redriver shutting down")
            .await
            .map_err(|e| anyhow!("Failed to close RabbitMQ channel: {}", e))?;

        self.connection
            .close(200, "dlq redriver shutting down")
            .await
            .map_err(|e| anyhow!("Failed to close RabbitMQ connection: {}", e))?;

        info!("RabbitMQ connection closed");

        Ok(())
    }
}

#[async_trait]
impl Publisher for RabbitMqClient {
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
    ) -> Result<(), PublishError> {
        let mut channel = self.publish_channel.lock().await;

        if !channel.status().connected() {
            info!("Publish channel closed, reopening");
            *channel = open_publish_channel(&self.connection, self.publisher_confirms)
                .await
                .map_err(|e| PublishError::Channel(e.to_string()))?;
        }

        let published = publish_on(&channel, exchange, routing_key, body).await;

        // The broker closes the channel after a channel-level error; start the
        // next publish on a fresh one.
        if let Err(PublishError::Channel(_)) = &published {
            match open_publish_channel(&self.connection, self.publisher_confirms).await {
                Ok(reopened) => *channel = reopened,
                Err(e) => warn!(error = %e, "Failed to reopen RabbitMQ publish channel"),
            }
        }

        published
    }
}

async fn open_publish_channel(
    connection: &Connection,
    publisher_confirms: bool,
) -> Result<Channel, ConnectionError> {
    let channel = connection
        .create_channel()
        .await
        .map_err(ConnectionError::Channel)?;

    if publisher_confirms {
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(ConnectionError::Confirms)?;
    }

    Ok(channel)
}

/// Mandatory publish: with confirms on, a message no queue is bound for comes
/// back as a return instead of being dropped by the broker.
async fn publish_on(
    channel: &Channel,
    exchange: &str,
    routing_key: &str,
    body: &[u8],
) -> Result<(), PublishError> {
    let confirmation = channel
        .basic_publish(
            exchange,
            routing_key,
            BasicPublishOptions {
                mandatory: true,
                ..Default::default()
            },
            body,
            BasicProperties::default().with_content_type("text/plain".into()),
        )
        .await?
        .await?;

    match confirmation {
        Confirmation::Ack(Some(_)) => Err(PublishError::Unroutable {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
        }),
        Confirmation::Nack(_) => Err(PublishError::Rejected),
        _ => Ok(()),
    }
}

/// A delivery pulled from the dead-letter queue.
pub struct DlqDelivery(pub Delivery);

#[async_trait]
impl DeadLetter for DlqDelivery {
    fn delivery_tag(&self) -> u64 {
        self.0.delivery_tag
    }

    fn body(&self) -> &[u8] {
        &self.0.data
    }

    fn headers(&self) -> Option<&FieldTable> {
        self.0.properties.headers().as_ref()
    }

    async fn acknowledge(self) -> Result<(), Error> {
        self.0
            .acker
            .ack(BasicAckOptions::default())
            .await
            .map(|_| ())
            .map_err(|e| anyhow!("Failed to acknowledge message: {}", e))
    }

    async fn reject(self, requeue: bool) -> Result<(), Error> {
        self.0
            .acker
            .reject(BasicRejectOptions { requeue })
            .await
            .map(|_| ())
            .map_err(|e| anyhow!("Failed to reject message: {}", e))
    }
}
