use futures::future::{BoxFuture, FutureExt, Shared};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::amqp_client::{AmqpChannel, LinkEvent};
use super::connection::{ConnectionManager, LinkState};
use super::errors::{PublisherError, Result};

/// A handle to the shared confirm channel.
#[derive(Clone)]
pub struct ChannelLease {
    generation: u64,
    connection_generation: u64,
    channel: Arc<dyn AmqpChannel>,
}

impl ChannelLease {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Generation of the connection this channel was opened on.
    pub fn connection_generation(&self) -> u64 {
        self.connection_generation
    }

    pub fn channel(&self) -> &Arc<dyn AmqpChannel> {
        &self.channel
    }
}

impl fmt::Debug for ChannelLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelLease")
            .field("generation", &self.generation)
            .field("connection_generation", &self.connection_generation)
            .finish_non_exhaustive()
    }
}

type PendingChannel = Shared<BoxFuture<'static, Result<ChannelLease>>>;

enum ChannelState {
    Disconnected,
    Opening {
        generation: u64,
        pending: PendingChannel,
    },
    Open(ChannelLease),
    Closing,
}

struct ChannelInner {
    connections: ConnectionManager,
    creation_timeout: Duration,
    state: Mutex<ChannelState>,
    generations: AtomicU64,
}

/// Owns the single shared publisher-confirm channel.
///
/// A cached channel counts as usable while it has not reported an error or
/// close and its parent connection is still the open one. That is the best
/// available signal; only a real operation proves the channel works.
#[derive(Clone)]
pub struct ChannelManager {
    inner: Arc<ChannelInner>,
}

impl ChannelManager {
    pub fn new(connections: ConnectionManager, creation_timeout: Duration) -> Self {
        ChannelManager {
            inner: Arc::new(ChannelInner {
                connections,
                creation_timeout,
                state: Mutex::new(ChannelState::Disconnected),
                generations: AtomicU64::new(1),
            }),
        }
    }

    /// Returns the cached channel or opens a new one on the current
    /// connection. Concurrent callers share one open attempt.
    pub async fn acquire(&self) -> Result<ChannelLease> {
        let pending = {
            let mut state = self.inner.lock_state();
            let in_flight = match &*state {
                ChannelState::Open(lease) if self.inner.parent_is_live(lease) => {
                    return Ok(lease.clone())
                }
                ChannelState::Open(lease) => {
                    debug!(
                        generation = lease.generation,
                        "Parent connection is gone; dropping cached channel"
                    );
                    None
                }
                ChannelState::Opening { pending, .. } => Some(pending.clone()),
                ChannelState::Disconnected | ChannelState::Closing => None,
            };

            match in_flight {
                Some(pending) => pending,
                None => {
                    let generation = self.inner.generations.fetch_add(1, Ordering::SeqCst);
                    let pending = open(Arc::clone(&self.inner), generation).boxed().shared();
                    *state = ChannelState::Opening {
                        generation,
                        pending: pending.clone(),
                    };
                    pending
                }
            }
        };

        pending.await
    }

    /// Stops handing out `lease`. Does not close it.
    pub fn invalidate(&self, lease: &ChannelLease) -> bool {
        self.inner.invalidate(lease.generation, "discarded after failure")
    }

    /// Invalidates and closes `lease` so the next acquisition opens a fresh
    /// channel. Close failures are ignored.
    pub async fn discard(&self, lease: ChannelLease) {
        self.invalidate(&lease);
        debug!(generation = lease.generation, "Discarding channel");
        match timeout(self.inner.creation_timeout, lease.channel.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => debug!(error = %err, "Ignoring error while closing discarded channel"),
            Err(_) => debug!("Timed out closing discarded channel"),
        }
    }

    pub fn state(&self) -> LinkState {
        match &*self.inner.lock_state() {
            ChannelState::Disconnected => LinkState::Disconnected,
            ChannelState::Opening { .. } => LinkState::Connecting,
            ChannelState::Open(lease) if self.inner.parent_is_live(lease) => LinkState::Open,
            ChannelState::Open(_) => LinkState::Disconnected,
            ChannelState::Closing => LinkState::Closing,
        }
    }

    pub fn is_open(&self) -> bool {
        self.state() == LinkState::Open
    }

    pub async fn close(&self) {
        let previous = std::mem::replace(&mut *self.inner.lock_state(), ChannelState::Closing);

        if let ChannelState::Open(lease) = previous {
            info!(generation = lease.generation, "Closing RabbitMQ channel");
            if let Err(err) = lease.channel.close().await {
                debug!(error = %err, "Ignoring error while closing channel");
            }
        }

        let mut state = self.inner.lock_state();
        if matches!(*state, ChannelState::Closing) {
            *state = ChannelState::Disconnected;
        }
    }
}

impl ChannelInner {
    fn lock_state(&self) -> MutexGuard<'_, ChannelState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn parent_is_live(&self, lease: &ChannelLease) -> bool {
        self.connections.current_generation() == Some(lease.connection_generation)
    }

    fn invalidate(&self, generation: u64, reason: &str) -> bool {
        let mut state = self.lock_state();
        match &*state {
            ChannelState::Open(lease) if lease.generation == generation => {
                debug!(generation, reason, "Channel invalidated");
                *state = ChannelState::Disconnected;
                true
            }
            _ => false,
        }
    }

    fn settle(&self, generation: u64, lease: Option<ChannelLease>) -> bool {
        let mut state = self.lock_state();
        match &*state {
            ChannelState::Opening { generation: g, .. } if *g == generation => {
                *state = match lease {
                    Some(lease) => ChannelState::Open(lease),
                    None => ChannelState::Disconnected,
                };
                true
            }
            _ => false,
        }
    }
}

fn watch(inner: &Arc<ChannelInner>, channel: &Arc<dyn AmqpChannel>, generation: u64) {
    let weak: Weak<ChannelInner> = Arc::downgrade(inner);
    channel.on_event(Box::new(move |event: LinkEvent| {
        let Some(inner) = weak.upgrade() else {
            return;
        };
        match event {
            LinkEvent::Error(cause) => {
                warn!(generation, cause = %cause, "RabbitMQ channel error");
                inner.invalidate(generation, &cause);
            }
            LinkEvent::Closed => {
                inner.invalidate(generation, "closed");
            }
        }
    }));
}

async fn open(inner: Arc<ChannelInner>, generation: u64) -> Result<ChannelLease> {
    let connection = match inner.connections.acquire().await {
        Ok(connection) => connection,
        Err(err) => {
            inner.settle(generation, None);
            return Err(err);
        }
    };

    debug!(
        generation,
        connection = connection.generation(),
        "Creating confirm channel"
    );
    let created = match timeout(
        inner.creation_timeout,
        connection.connection().create_confirm_channel(),
    )
    .await
    {
        Ok(Ok(channel)) => Ok(channel),
        Ok(Err(err)) => Err(PublisherError::from(err)),
        Err(_) => Err(PublisherError::Channel(format!(
            "Timed out creating channel after {:?}",
            inner.creation_timeout
        ))),
    };

    let channel = match created {
        Ok(channel) => channel,
        Err(err) => {
            warn!(generation, error = %err, "Failed to create channel");
            inner.settle(generation, None);
            return Err(err);
        }
    };

    watch(&inner, &channel, generation);
    let lease = ChannelLease {
        generation,
        connection_generation: connection.generation(),
        channel,
    };

    if inner.settle(generation, Some(lease.clone())) {
        Ok(lease)
    } else {
        lease.channel.close().await.ok();
        Err(PublisherError::Channel(
            "Channel was shut down while opening".to_string(),
        ))
    }
}
