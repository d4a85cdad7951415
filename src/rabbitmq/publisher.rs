use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use super::amqp_client::Confirmation;
use super::channel_manager::ChannelLease;
use super::errors::{PublisherError, Result};
use super::link::BrokerLink;
use super::queue::QueueEnsurer;
use super::retry::RetryPolicy;
use crate::env::Settings;
use crate::message::OutboundMessage;

/// Where a single publish attempt got to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishStage {
    Idle,
    Connecting,
    ChannelReady,
    QueueEnsured,
    Publishing,
    Confirmed,
    Failed,
}

/// What happened on one pass through the retry loop.
#[derive(Debug, Clone)]
pub struct PublishAttempt {
    pub number: u32,
    pub channel_generation: Option<u64>,
    pub stage: PublishStage,
    pub cause: Option<PublisherError>,
}

impl PublishAttempt {
    fn new(number: u32) -> Self {
        Self {
            number,
            channel_generation: None,
            stage: PublishStage::Idle,
            cause: None,
        }
    }

    fn advance(&mut self, stage: PublishStage) {
        trace!(attempt = self.number, from = ?self.stage, to = ?stage, "Publish stage");
        self.stage = stage;
    }
}

/// Returned once the broker has confirmed a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishReceipt {
    pub message_id: Uuid,
    pub attempts: u32,
}

/// Publishes one message at a time with broker confirmation, retrying on a
/// fresh channel until the attempt budget runs out.
pub struct PublishCoordinator {
    link: Arc<BrokerLink>,
    settings: Settings,
    queue_ensurer: QueueEnsurer,
}

impl PublishCoordinator {
    pub fn new(link: Arc<BrokerLink>, settings: &Settings) -> Self {
        PublishCoordinator {
            link,
            settings: settings.clone(),
            queue_ensurer: QueueEnsurer::new(settings.queue_declare_retry, settings.publish_timeout),
        }
    }

    pub fn link(&self) -> &Arc<BrokerLink> {
        &self.link
    }

    fn retry(&self) -> RetryPolicy {
        self.settings.publish_retry
    }

    fn publish_timeout(&self) -> Duration {
        self.settings.publish_timeout
    }

    /// Serializes `payload` as JSON and publishes it persistently.
    ///
    /// Configuration and serialization problems fail before any broker I/O
    /// and are never retried.
    pub async fn publish<T: Serialize + ?Sized>(&self, payload: &T) -> Result<PublishReceipt> {
        self.settings.queue()?;
        self.settings.amqp_addr()?;
        let message = OutboundMessage::from_json(payload)?;
        self.publish_message(&message).await
    }

    pub async fn publish_message(&self, message: &OutboundMessage) -> Result<PublishReceipt> {
        let queue = self.settings.queue()?;
        let retry = self.retry();
        let mut previous: Option<ChannelLease> = None;
        let mut history: Vec<PublishAttempt> = Vec::with_capacity(retry.max_attempts as usize);

        for number in retry.attempts() {
            let mut attempt = PublishAttempt::new(number);

            match self.attempt(queue, message, &mut previous, &mut attempt).await {
                Ok(()) => {
                    attempt.advance(PublishStage::Confirmed);
                    info!(
                        message_id = %message.id(),
                        queue,
                        attempt = number,
                        "Message confirmed by broker"
                    );
                    return Ok(PublishReceipt {
                        message_id: message.id(),
                        attempts: number,
                    });
                }
                Err(err) if !err.is_retryable() => return Err(err),
                Err(err) => {
                    warn!(
                        message_id = %message.id(),
                        attempt = number,
                        max_attempts = retry.max_attempts,
                        stage = ?attempt.stage,
                        error = %err,
                        "Publish attempt failed"
                    );
                    attempt.advance(PublishStage::Failed);
                    attempt.cause = Some(err);
                    history.push(attempt);

                    if retry.has_attempts_after(number) {
                        let delay = retry.delay_after(number);
                        debug!(attempt = number, ?delay, "Backing off before retry");
                        sleep(delay).await;
                    }
                }
            }
        }

        if let Some(stale) = previous.take() {
            self.link.channels().discard(stale).await;
        }

        let last = history
            .last()
            .and_then(|attempt| attempt.cause.clone())
            .unwrap_or_else(|| PublisherError::Channel("no publish attempt was made".to_string()));

        error!(
            message_id = %message.id(),
            queue,
            attempts = retry.max_attempts,
            last_cause = %last,
            "Giving up on message"
        );

        Err(PublisherError::RetriesExhausted {
            attempts: retry.max_attempts,
            last: Box::new(last),
        })
    }

    async fn attempt(
        &self,
        queue: &str,
        message: &OutboundMessage,
        previous: &mut Option<ChannelLease>,
        attempt: &mut PublishAttempt,
    ) -> Result<()> {
        attempt.advance(PublishStage::Connecting);
        let connection = self.link.connections().acquire().await?;

        // a retry never reuses the channel from the failed attempt
        if let Some(stale) = previous.take() {
            self.link.channels().discard(stale).await;
        }

        let outcome = self.attempt_on(queue, message, previous, attempt).await;
        if let Err(err) = &outcome {
            if err.is_connection_failure() {
                self.link.connections().invalidate(&connection);
            }
        }
        outcome
    }

    async fn attempt_on(
        &self,
        queue: &str,
        message: &OutboundMessage,
        previous: &mut Option<ChannelLease>,
        attempt: &mut PublishAttempt,
    ) -> Result<()> {
        let channel = self.link.channels().acquire().await?;
        attempt.channel_generation = Some(channel.generation());
        attempt.advance(PublishStage::ChannelReady);

        let outcome = self.deliver(&channel, queue, message, attempt).await;
        if outcome.is_err() {
            // a timed-out confirm may still have reached the broker, but the
            // channel can no longer be trusted either way
            self.link.channels().invalidate(&channel);
            *previous = Some(channel);
        }
        outcome
    }

    async fn deliver(
        &self,
        channel: &ChannelLease,
        queue: &str,
        message: &OutboundMessage,
        attempt: &mut PublishAttempt,
    ) -> Result<()> {
        self.queue_ensurer.ensure_queue(channel, queue).await?;
        attempt.advance(PublishStage::QueueEnsured);

        attempt.advance(PublishStage::Publishing);
        let publish_timeout = self.publish_timeout();
        let confirmation = timeout(publish_timeout, async {
            let dispatch = channel.channel().send(queue, message).await?;
            if !dispatch.buffered {
                debug!(message_id = %message.id(), "Client buffer full; awaiting confirm");
            }
            let confirmation = dispatch.confirmation.await?;
            Ok::<Confirmation, PublisherError>(confirmation)
        })
        .await
        .map_err(|_| PublisherError::PublishTimeout(publish_timeout))??;

        match confirmation {
            Confirmation::Ack => Ok(()),
            Confirmation::Nack => Err(PublisherError::Nacked(format!(
                "message {} was negatively acknowledged",
                message.id()
            ))),
        }
    }
}
