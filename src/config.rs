use std::{collections::BTreeSet, time::Duration};

use dotenvy::dotenv;
use serde::{Deserialize, Deserializer};

use crate::error::ConfigError;

#[derive(Clone, Deserialize, Debug)]
pub struct Config {
    pub rabbitmq_url: String,
    pub dlq_name: String,

    /// Allow-list of original routing keys eligible for redrive.
    #[serde(deserialize_with = "comma_separated")]
    pub routing_keys: BTreeSet<String>,

    #[serde(default = "default_publish_timeout_ms")]
    pub publish_timeout_ms: u64,

    #[serde(default = "default_prefetch_count")]
    pub prefetch_count: u16,

    #[serde(default = "default_consumer_tag")]
    pub consumer_tag: String,

    #[serde(default = "default_true")]
    pub declare_queue: bool,

    #[serde(default = "default_true")]
    pub publisher_confirms: bool,

    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        dotenv().ok();

        let config = envy::from_env::<Self>()?;
        config.validate()
    }

    pub fn from_vars<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let config = envy::from_iter::<_, Self>(vars)?;
        config.validate()
    }

    fn validate(self) -> Result<Self, ConfigError> {
        if self.rabbitmq_url.trim().is_empty() {
            return Err(ConfigError::Empty("RABBITMQ_URL"));
        }
        if self.dlq_name.trim().is_empty() {
            return Err(ConfigError::Empty("DLQ_NAME"));
        }
        if self.routing_keys.is_empty() {
            return Err(ConfigError::NoRoutingKeys);
        }
        Ok(self)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

fn comma_separated<'de, D>(deserializer: D) -> Result<BTreeSet<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    Ok(raw
        .split(',')
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .map(str::to_string)
        .collect())
}

fn default_publish_timeout_ms() -> u64 {
    5000
}

fn default_prefetch_count() -> u16 {
    10
}

fn default_consumer_tag() -> String {
    "dlq_redriver".to_string()
}

fn default_true() -> bool {
    true
}

fn default_shutdown_grace_ms() -> u64 {
    5000
}
