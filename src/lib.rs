//! Confirmed, retried publication of record events to RabbitMQ.
//!
//! [`BrokerLink`] owns the shared connection and channel,
//! [`PublishCoordinator`] drives one publish through connect, channel, queue
//! declaration and publisher confirm, and [`workflow`] ties publication to a
//! record store with a compensating delete.

pub mod config;
pub mod env;
pub mod message;
pub mod rabbitmq;
pub mod workflow;

pub use env::Settings;
pub use message::OutboundMessage;
pub use rabbitmq::{BrokerLink, PublishCoordinator, PublishReceipt, PublisherError};
