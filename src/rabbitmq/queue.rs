use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use super::channel_manager::ChannelLease;
use super::errors::{PublisherError, Result};
use super::retry::RetryPolicy;

/// Declares the durable target queue before each publish.
///
/// Has its own retry budget, nested inside the publish loop.
#[derive(Debug, Clone)]
pub struct QueueEnsurer {
    policy: RetryPolicy,
    declare_timeout: Duration,
}

impl QueueEnsurer {
    pub fn new(policy: RetryPolicy, declare_timeout: Duration) -> Self {
        Self {
            policy,
            declare_timeout,
        }
    }

    pub async fn ensure_queue(&self, channel: &ChannelLease, name: &str) -> Result<()> {
        let mut last_cause = String::new();

        for attempt in self.policy.attempts() {
            match timeout(self.declare_timeout, channel.channel().declare_durable_queue(name)).await {
                Ok(Ok(())) => {
                    debug!(queue = name, attempt, "Queue declared");
                    return Ok(());
                }
                Ok(Err(err)) => last_cause = err.to_string(),
                Err(_) => {
                    last_cause = format!("declaration timed out after {:?}", self.declare_timeout)
                }
            }

            warn!(
                queue = name,
                attempt,
                max_attempts = self.policy.max_attempts,
                cause = %last_cause,
                "Queue declaration failed"
            );

            if self.policy.has_attempts_after(attempt) {
                sleep(self.policy.delay_after(attempt)).await;
            }
        }

        Err(PublisherError::QueueDeclaration {
            attempts: self.policy.max_attempts,
            cause: last_cause,
        })
    }
}
