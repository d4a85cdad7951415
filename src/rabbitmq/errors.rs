// src/rabbitmq/errors.rs

use serde_json::Error as SerdeError;
use std::time::Duration;
use thiserror::Error;

use super::amqp_client::AmqpError;

/// Every failure the publishing core can report.
///
/// The enum is `Clone` because single-flighted acquisitions hand one outcome
/// to every waiter.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PublisherError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Message serialization error: {0}")]
    Serialization(String),

    #[error("RabbitMQ connection error: {0}")]
    Connection(String),

    #[error("RabbitMQ channel error: {0}")]
    Channel(String),

    #[error("Failed to declare queue after {attempts} attempts: {cause}")]
    QueueDeclaration { attempts: u32, cause: String },

    #[error("No publisher confirm received within {0:?}")]
    PublishTimeout(Duration),

    #[error("Broker rejected message: {0}")]
    Nacked(String),

    #[error("Publish failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        last: Box<PublisherError>,
    },
}

// Custom Result type for publisher operations
pub type Result<T> = std::result::Result<T, PublisherError>;

impl PublisherError {
    /// Broker-side failures may succeed on a fresh channel; anything else
    /// would fail the same way again.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            PublisherError::Configuration(_)
                | PublisherError::Serialization(_)
                | PublisherError::RetriesExhausted { .. }
        )
    }

    pub fn is_connection_failure(&self) -> bool {
        matches!(self, PublisherError::Connection(_))
    }

    /// The innermost cause, unwrapping the retry aggregate.
    pub fn last_cause(&self) -> &PublisherError {
        match self {
            PublisherError::RetriesExhausted { last, .. } => last.last_cause(),
            other => other,
        }
    }
}

impl From<SerdeError> for PublisherError {
    fn from(error: SerdeError) -> Self {
        PublisherError::Serialization(error.to_string())
    }
}

impl From<AmqpError> for PublisherError {
    fn from(error: AmqpError) -> Self {
        match error {
            AmqpError::ConnectionError(text) => PublisherError::Connection(text),
            AmqpError::ChannelError(text) => PublisherError::Channel(text),
        }
    }
}
