use std::sync::Arc;
use tracing::{info, warn};

use super::amqp_client::AmqpConnector;
use super::channel_manager::ChannelManager;
use super::connection::ConnectionManager;
use super::lapin_client::LapinConnector;
use crate::env::Settings;

/// The process-wide broker resources: one connection and one confirm
/// channel.
///
/// Create one per process (or per test), share it by `Arc`, and call
/// [`BrokerLink::close`] on shutdown. After `close` the link is reusable; the
/// next acquisition reconnects from scratch.
pub struct BrokerLink {
    connections: ConnectionManager,
    channels: ChannelManager,
}

impl BrokerLink {
    pub fn new(settings: &Settings, connector: Arc<dyn AmqpConnector>) -> Self {
        let connections = ConnectionManager::new(settings, connector);
        let channels = ChannelManager::new(connections.clone(), settings.connection_timeout);
        BrokerLink {
            connections,
            channels,
        }
    }

    /// A link backed by lapin.
    pub fn lapin(settings: &Settings) -> Self {
        Self::new(settings, Arc::new(LapinConnector::default()))
    }

    pub fn connections(&self) -> &ConnectionManager {
        &self.connections
    }

    pub fn channels(&self) -> &ChannelManager {
        &self.channels
    }

    /// Best-effort liveness: true when a connection and a channel can be
    /// acquired right now.
    pub async fn is_healthy(&self) -> bool {
        match self.channels.acquire().await {
            Ok(_) => true,
            Err(err) => {
                warn!(error = %err, "RabbitMQ health check failed");
                false
            }
        }
    }

    /// Closes the channel, then the connection. Never fails.
    pub async fn close(&self) {
        info!("Shutting down RabbitMQ link");
        self.channels.close().await;
        self.connections.close().await;
    }
}
