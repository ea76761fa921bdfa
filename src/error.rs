use std::time::Duration;

use thiserror::Error;

/// Missing or invalid startup configuration. Fatal before any broker connection.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid or missing environmental variable: {0}")]
    Env(#[from] envy::Error),

    #[error("{0} must not be empty")]
    Empty(&'static str),

    #[error("ROUTING_KEYS must contain at least one routing key")]
    NoRoutingKeys,
}

/// Broker unreachable, or the channel could not be set up. Fatal at startup.
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("Failed to connect to RabbitMQ: {0}")]
    Connect(#[source] lapin::Error),

    #[error("RabbitMQ channel creation failed: {0}")]
    Channel(#[source] lapin::Error),

    #[error("Failed to set up QoS: {0}")]
    Qos(#[source] lapin::Error),

    #[error("Failed to enable publisher confirms: {0}")]
    Confirms(#[source] lapin::Error),

    #[error("Failed to declare dead-letter queue {queue}: {source}")]
    Declare {
        queue: String,
        #[source]
        source: lapin::Error,
    },

    #[error("Failed to create consumer for {queue}: {source}")]
    Consume {
        queue: String,
        #[source]
        source: lapin::Error,
    },
}

/// Dead-letter metadata is absent or not shaped like an `x-death` history.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("message carries no x-death header")]
    MissingHistory,

    #[error("x-death header is not an array")]
    MalformedHistory,

    #[error("x-death header is empty")]
    EmptyHistory,

    #[error("x-death entry is not a table")]
    MalformedEntry,

    #[error("x-death entry has no {0} field")]
    MissingField(&'static str),

    #[error("x-death entry field {0} has an unexpected type")]
    MalformedField(&'static str),

    #[error("x-death routing-keys contains no string value")]
    NoStringRoutingKey,
}

/// A republish attempt that did not make it to the broker.
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("publish timed out after {0:?}")]
    Timeout(Duration),

    #[error("channel error: {0}")]
    Channel(String),

    #[error("broker rejected the publish")]
    Rejected,

    #[error("no queue is bound to {exchange} for {routing_key}")]
    Unroutable {
        exchange: String,
        routing_key: String,
    },
}

impl From<lapin::Error> for PublishError {
    fn from(err: lapin::Error) -> Self {
        PublishError::Channel(err.to_string())
    }
}

impl PublishError {
    pub fn kind(&self) -> &'static str {
        match self {
            PublishError::Timeout(_) => "timeout",
            PublishError::Channel(_) => "channel",
            PublishError::Rejected => "rejected",
            PublishError::Unroutable { .. } => "unroutable",
        }
    }
}
