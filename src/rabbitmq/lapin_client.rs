// src/rabbitmq/lapin_client.rs

use async_trait::async_trait;
use futures::FutureExt;
use lapin::{
    options::{BasicPublishOptions, ConfirmSelectOptions, QueueDeclareOptions},
    types::FieldTable,
    BasicProperties, Channel, Connection, ConnectionProperties,
};
use std::sync::Arc;

use super::amqp_client::{
    AmqpChannel, AmqpConnection, AmqpConnector, AmqpError, Confirmation, Dispatch, EventHandler,
    LinkEvent,
};
use crate::message::OutboundMessage;

const REPLY_SUCCESS: u16 = 200;
const DELIVERY_MODE_TRANSIENT: u8 = 1;
const DELIVERY_MODE_PERSISTENT: u8 = 2;

#[derive(Default)]
pub struct LapinConnector {
    properties: ConnectionProperties,
}

impl LapinConnector {
    pub fn with_properties(properties: ConnectionProperties) -> Self {
        Self { properties }
    }
}

#[async_trait]
impl AmqpConnector for LapinConnector {
    async fn connect(&self, uri: &str) -> Result<Arc<dyn AmqpConnection>, AmqpError> {
        let connection = Connection::connect(uri, self.properties.clone())
            .await
            .map_err(|e| AmqpError::ConnectionError(format!("Failed to connect: {}", e)))?;

        Ok(Arc::new(LapinConnection { connection }))
    }
}

pub struct LapinConnection {
    connection: Connection,
}

#[async_trait]
impl AmqpConnection for LapinConnection {
    fn on_event(&self, handler: EventHandler) {
        self.connection
            .on_error(move |err| handler(LinkEvent::Error(err.to_string())));
    }

    async fn create_confirm_channel(&self) -> Result<Arc<dyn AmqpChannel>, AmqpError> {
        let channel = self.connection.create_channel().await.map_err(|e| {
            if self.connection.status().connected() {
                AmqpError::ChannelError(format!("Failed to create channel: {}", e))
            } else {
                AmqpError::ConnectionError(format!("Failed to create channel: {}", e))
            }
        })?;

        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| AmqpError::ChannelError(format!("Failed to enable confirms: {}", e)))?;

        Ok(Arc::new(LapinChannel { channel }))
    }

    async fn close(&self) -> Result<(), AmqpError> {
        self.connection
            .close(REPLY_SUCCESS, "Closing connection")
            .await
            .map_err(|e| AmqpError::ConnectionError(e.to_string()))
    }
}

pub struct LapinChannel {
    channel: Channel,
}

#[async_trait]
impl AmqpChannel for LapinChannel {
    fn on_event(&self, handler: EventHandler) {
        self.channel
            .on_error(move |err| handler(LinkEvent::Error(err.to_string())));
    }

    async fn declare_durable_queue(&self, name: &str) -> Result<(), AmqpError> {
        self.channel
            .queue_declare(
                name,
                QueueDeclareOptions {
                    durable: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map(|_| ())
            .map_err(|e| AmqpError::ChannelError(format!("Failed to declare queue: {}", e)))
    }

    async fn send(&self, queue: &str, message: &OutboundMessage) -> Result<Dispatch, AmqpError> {
        let delivery_mode = if message.is_persistent() {
            DELIVERY_MODE_PERSISTENT
        } else {
            DELIVERY_MODE_TRANSIENT
        };

        let properties = BasicProperties::default()
            .with_message_id(message.id().to_string().into())
            .with_content_type(message.content_type().into())
            .with_timestamp(message.created_at().timestamp().max(0) as u64)
            .with_delivery_mode(delivery_mode);

        // lapin applies flow control inside basic_publish, so there is no
        // separate backpressure signal to report.
        let confirm = self
            .channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                message.body(),
                properties,
            )
            .await
            .map_err(|e| AmqpError::ChannelError(format!("Failed to publish: {}", e)))?;

        let confirmation = async move {
            match confirm.await {
                Ok(confirmation) if confirmation.is_nack() => Ok(Confirmation::Nack),
                Ok(_) => Ok(Confirmation::Ack),
                Err(e) => Err(AmqpError::ChannelError(format!("Confirm failed: {}", e))),
            }
        }
        .boxed();

        Ok(Dispatch {
            buffered: true,
            confirmation,
        })
    }

    async fn close(&self) -> Result<(), AmqpError> {
        self.channel
            .close(REPLY_SUCCESS, "Closing channel")
            .await
            .map_err(|e| AmqpError::ChannelError(e.to_string()))
    }
}
