use dotenv::dotenv;
use std::env;
use std::time::Duration;

use crate::config::FileConfig;
use crate::rabbitmq::errors::{PublisherError, Result};
use crate::rabbitmq::retry::RetryPolicy;

pub const AMQP_ADDR: &str = "AMQP_ADDR";
pub const EVENT_QUEUE: &str = "EVENT_QUEUE";
pub const CONNECT_TIMEOUT_MS: &str = "RABBITMQ_CONNECT_TIMEOUT_MS";
pub const PUBLISH_TIMEOUT_MS: &str = "RABBITMQ_PUBLISH_TIMEOUT_MS";
pub const MAX_RETRY_ATTEMPTS: &str = "RABBITMQ_MAX_RETRY_ATTEMPTS";
pub const RETRY_DELAY_MS: &str = "RABBITMQ_RETRY_DELAY_MS";
pub const QUEUE_DECLARE_MAX_ATTEMPTS: &str = "RABBITMQ_QUEUE_DECLARE_MAX_ATTEMPTS";
pub const QUEUE_DECLARE_DELAY_MS: &str = "RABBITMQ_QUEUE_DECLARE_DELAY_MS";

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_publish_timeout_ms() -> u64 {
    5_000
}

fn default_max_retry_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1_000
}

/// Publisher settings.
///
/// The broker URL and queue name stay optional here; they are demanded only
/// when something first needs them.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub amqp_addr: Option<String>,
    pub queue: Option<String>,
    pub connection_timeout: Duration,
    pub publish_timeout: Duration,
    pub publish_retry: RetryPolicy,
    pub queue_declare_retry: RetryPolicy,
}

impl Default for Settings {
    fn default() -> Self {
        let publish_retry = RetryPolicy::new(
            default_max_retry_attempts(),
            Duration::from_millis(default_retry_delay_ms()),
        );
        Settings {
            amqp_addr: None,
            queue: None,
            connection_timeout: Duration::from_millis(default_connect_timeout_ms()),
            publish_timeout: Duration::from_millis(default_publish_timeout_ms()),
            publish_retry,
            queue_declare_retry: publish_retry,
        }
    }
}

impl Settings {
    /// Loads `.env`, the optional JSON file, then the process environment.
    pub fn load(file: Option<&FileConfig>) -> Result<Self> {
        dotenv().ok();
        Self::from_sources(file, |key| env::var(key).ok())
    }

    pub fn from_sources<F>(file: Option<&FileConfig>, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let default_file = FileConfig::default();
        let file = file.unwrap_or(&default_file);
        let lookup = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let amqp_addr = lookup(AMQP_ADDR).or_else(|| file.connection.uri.clone());
        let queue = lookup(EVENT_QUEUE).or_else(|| file.publishing.queue.clone());

        let connect_ms = parse_or(&lookup, CONNECT_TIMEOUT_MS, file.connection.connection_timeout_ms)?
            .unwrap_or_else(default_connect_timeout_ms);
        let publish_ms = parse_or(&lookup, PUBLISH_TIMEOUT_MS, file.publishing.publish_timeout_ms)?
            .unwrap_or_else(default_publish_timeout_ms);
        let max_attempts = parse_or(&lookup, MAX_RETRY_ATTEMPTS, file.publishing.max_retry_attempts)?
            .unwrap_or_else(default_max_retry_attempts);
        let delay_ms = parse_or(&lookup, RETRY_DELAY_MS, file.publishing.retry_delay_ms)?
            .unwrap_or_else(default_retry_delay_ms);
        let declare_attempts = parse_or(
            &lookup,
            QUEUE_DECLARE_MAX_ATTEMPTS,
            file.publishing.queue_declare_max_attempts,
        )?
        .unwrap_or(max_attempts);
        let declare_delay_ms = parse_or(
            &lookup,
            QUEUE_DECLARE_DELAY_MS,
            file.publishing.queue_declare_delay_ms,
        )?
        .unwrap_or(delay_ms);

        Ok(Settings {
            amqp_addr,
            queue,
            connection_timeout: Duration::from_millis(connect_ms),
            publish_timeout: Duration::from_millis(publish_ms),
            publish_retry: RetryPolicy::new(max_attempts, Duration::from_millis(delay_ms)),
            queue_declare_retry: RetryPolicy::new(
                declare_attempts,
                Duration::from_millis(declare_delay_ms),
            ),
        })
    }

    pub fn with_amqp_addr(mut self, addr: impl Into<String>) -> Self {
        self.amqp_addr = Some(addr.into());
        self
    }

    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    pub fn amqp_addr(&self) -> Result<&str> {
        self.amqp_addr.as_deref().ok_or_else(|| {
            PublisherError::Configuration(format!("{} is not set", AMQP_ADDR))
        })
    }

    pub fn queue(&self) -> Result<&str> {
        self.queue.as_deref().ok_or_else(|| {
            PublisherError::Configuration(format!("{} is not set", EVENT_QUEUE))
        })
    }
}

fn parse_or<T, F>(lookup: &F, key: &str, fallback: Option<T>) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map(Some).map_err(|e| {
            PublisherError::Configuration(format!("{} has invalid value {:?}: {}", key, raw, e))
        }),
        None => Ok(fallback),
    }
}
