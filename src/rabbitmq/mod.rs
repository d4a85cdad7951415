// src/rabbitmq/mod.rs
// Reliable event publication to RabbitMQ

pub mod amqp_client;
pub mod channel_manager;
pub mod connection;
pub mod errors;
pub mod lapin_client;
pub mod link;
pub mod publisher;
pub mod queue;
pub mod retry;

// Re-export specific items to simplify imports elsewhere
pub use channel_manager::{ChannelLease, ChannelManager};
pub use connection::{ConnectionLease, ConnectionManager, LinkState};
pub use errors::{PublisherError, Result};
pub use link::BrokerLink;
pub use publisher::{PublishAttempt, PublishCoordinator, PublishReceipt, PublishStage};
pub use queue::QueueEnsurer;
pub use retry::RetryPolicy;
