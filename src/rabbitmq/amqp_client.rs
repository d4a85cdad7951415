// src/rabbitmq/amqp_client.rs

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::Arc;
use thiserror::Error;

use crate::message::OutboundMessage;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AmqpError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Channel error: {0}")]
    ChannelError(String),
}

/// Lifecycle notifications pushed by the client for a connection or channel.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    Error(String),
    Closed,
}

pub type EventHandler = Box<dyn Fn(LinkEvent) + Send + Sync + 'static>;

/// Broker verdict for one published message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    Ack,
    Nack,
}

pub type ConfirmFuture = BoxFuture<'static, Result<Confirmation, AmqpError>>;

/// Result of handing a message to the client.
pub struct Dispatch {
    /// `false` when the client reported backpressure. The confirmation is
    /// still the only success signal.
    pub buffered: bool,
    pub confirmation: ConfirmFuture,
}

/// Opens broker sessions.
#[async_trait]
pub trait AmqpConnector: Send + Sync {
    async fn connect(&self, uri: &str) -> Result<Arc<dyn AmqpConnection>, AmqpError>;
}

/// One broker session.
#[async_trait]
pub trait AmqpConnection: Send + Sync {
    /// Register a handler for error and close events on this session.
    fn on_event(&self, handler: EventHandler);

    /// Open a channel with publisher confirms enabled.
    async fn create_confirm_channel(&self) -> Result<Arc<dyn AmqpChannel>, AmqpError>;

    async fn close(&self) -> Result<(), AmqpError>;
}

/// A confirm-mode channel bound to one connection.
#[async_trait]
pub trait AmqpChannel: Send + Sync {
    fn on_event(&self, handler: EventHandler);

    /// Declare `name` as a durable queue. Redeclaring an existing queue with
    /// the same arguments succeeds.
    async fn declare_durable_queue(&self, name: &str) -> Result<(), AmqpError>;

    /// Send `message` to `queue` through the default exchange.
    async fn send(&self, queue: &str, message: &OutboundMessage) -> Result<Dispatch, AmqpError>;

    async fn close(&self) -> Result<(), AmqpError>;
}
