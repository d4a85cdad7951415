use futures::future::{BoxFuture, FutureExt, Shared};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::amqp_client::{AmqpConnection, AmqpConnector, LinkEvent};
use super::errors::{PublisherError, Result};
use crate::env::Settings;

/// Observable lifecycle of a managed connection or channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Open,
    Closing,
}

/// A handle to the currently open connection, tagged with the generation
/// that created it.
#[derive(Clone)]
pub struct ConnectionLease {
    generation: u64,
    connection: Arc<dyn AmqpConnection>,
}

impl ConnectionLease {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn connection(&self) -> &Arc<dyn AmqpConnection> {
        &self.connection
    }
}

impl fmt::Debug for ConnectionLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionLease")
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

type PendingConnection = Shared<BoxFuture<'static, Result<ConnectionLease>>>;

enum ConnectionState {
    Disconnected,
    Connecting {
        generation: u64,
        pending: PendingConnection,
    },
    Open(ConnectionLease),
    Closing,
}

impl ConnectionState {
    fn link_state(&self) -> LinkState {
        match self {
            ConnectionState::Disconnected => LinkState::Disconnected,
            ConnectionState::Connecting { .. } => LinkState::Connecting,
            ConnectionState::Open(_) => LinkState::Open,
            ConnectionState::Closing => LinkState::Closing,
        }
    }
}

struct ConnectionInner {
    uri: Option<String>,
    connection_timeout: Duration,
    connector: Arc<dyn AmqpConnector>,
    state: Mutex<ConnectionState>,
    generations: AtomicU64,
}

/// Owns the single shared broker connection.
///
/// Connects lazily on first acquisition. Concurrent callers arriving while a
/// connect is in flight await the same attempt, so a burst of callers costs
/// one network handshake. Error and close events from the client move the
/// state back to `Disconnected`; nothing here retries.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ConnectionInner>,
}

impl ConnectionManager {
    pub fn new(settings: &Settings, connector: Arc<dyn AmqpConnector>) -> Self {
        ConnectionManager {
            inner: Arc::new(ConnectionInner {
                uri: settings.amqp_addr.clone(),
                connection_timeout: settings.connection_timeout,
                connector,
                state: Mutex::new(ConnectionState::Disconnected),
                generations: AtomicU64::new(1),
            }),
        }
    }

    /// Returns the open connection, connecting first if there is none.
    pub async fn acquire(&self) -> Result<ConnectionLease> {
        let uri = self.inner.uri.clone().ok_or_else(|| {
            PublisherError::Configuration(format!("{} is not set", crate::env::AMQP_ADDR))
        })?;

        let pending = {
            let mut state = self.inner.lock_state();
            let in_flight = match &*state {
                ConnectionState::Open(lease) => return Ok(lease.clone()),
                ConnectionState::Connecting { pending, .. } => Some(pending.clone()),
                ConnectionState::Disconnected | ConnectionState::Closing => None,
            };

            match in_flight {
                Some(pending) => pending,
                None => {
                    let generation = self.inner.generations.fetch_add(1, Ordering::SeqCst);
                    let pending = connect(Arc::clone(&self.inner), uri, generation)
                        .boxed()
                        .shared();
                    *state = ConnectionState::Connecting {
                        generation,
                        pending: pending.clone(),
                    };
                    pending
                }
            }
        };

        pending.await
    }

    /// Drops the cached connection if it is still the one `lease` refers to.
    pub fn invalidate(&self, lease: &ConnectionLease) -> bool {
        self.inner.invalidate(lease.generation, "invalidated by caller")
    }

    pub fn state(&self) -> LinkState {
        self.inner.lock_state().link_state()
    }

    pub fn is_open(&self) -> bool {
        self.state() == LinkState::Open
    }

    /// Generation of the open connection, if any.
    pub fn current_generation(&self) -> Option<u64> {
        match &*self.inner.lock_state() {
            ConnectionState::Open(lease) => Some(lease.generation),
            _ => None,
        }
    }

    /// Closes the connection if open. Close errors are logged and dropped.
    /// An in-flight connect is abandoned and its result discarded.
    pub async fn close(&self) {
        let previous = std::mem::replace(&mut *self.inner.lock_state(), ConnectionState::Closing);

        if let ConnectionState::Open(lease) = previous {
            info!(generation = lease.generation, "Closing RabbitMQ connection");
            if let Err(err) = lease.connection.close().await {
                debug!(error = %err, "Ignoring error while closing connection");
            }
        }

        let mut state = self.inner.lock_state();
        if matches!(*state, ConnectionState::Closing) {
            *state = ConnectionState::Disconnected;
        }
    }
}

impl ConnectionInner {
    fn lock_state(&self) -> MutexGuard<'_, ConnectionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn invalidate(&self, generation: u64, reason: &str) -> bool {
        let mut state = self.lock_state();
        match &*state {
            ConnectionState::Open(lease) if lease.generation == generation => {
                warn!(generation, reason, "RabbitMQ connection lost");
                *state = ConnectionState::Disconnected;
                true
            }
            _ => false,
        }
    }

    /// Resolves the in-flight attempt for `generation`. Returns false when the
    /// attempt was superseded (e.g. by `close`) while it was running.
    fn settle(&self, generation: u64, lease: Option<ConnectionLease>) -> bool {
        let mut state = self.lock_state();
        match &*state {
            ConnectionState::Connecting { generation: g, .. } if *g == generation => {
                *state = match lease {
                    Some(lease) => ConnectionState::Open(lease),
                    None => ConnectionState::Disconnected,
                };
                true
            }
            _ => false,
        }
    }
}

fn watch(inner: &Arc<ConnectionInner>, connection: &Arc<dyn AmqpConnection>, generation: u64) {
    let weak: Weak<ConnectionInner> = Arc::downgrade(inner);
    connection.on_event(Box::new(move |event: LinkEvent| {
        let Some(inner) = weak.upgrade() else {
            return;
        };
        match event {
            LinkEvent::Error(cause) => {
                inner.invalidate(generation, &cause);
            }
            LinkEvent::Closed => {
                inner.invalidate(generation, "closed by broker");
            }
        }
    }));
}

async fn connect(inner: Arc<ConnectionInner>, uri: String, generation: u64) -> Result<ConnectionLease> {
    info!(generation, "Connecting to RabbitMQ");

    let outcome = match timeout(inner.connection_timeout, inner.connector.connect(&uri)).await {
        Ok(Ok(connection)) => Ok(connection),
        Ok(Err(err)) => Err(PublisherError::from(err)),
        Err(_) => Err(PublisherError::Connection(format!(
            "Timed out connecting after {:?}",
            inner.connection_timeout
        ))),
    };

    let connection = match outcome {
        Ok(connection) => connection,
        Err(err) => {
            error!(generation, error = %err, "Failed to connect to RabbitMQ");
            inner.settle(generation, None);
            return Err(err);
        }
    };

    watch(&inner, &connection, generation);
    let lease = ConnectionLease {
        generation,
        connection,
    };

    if inner.settle(generation, Some(lease.clone())) {
        info!(generation, "Successfully connected to RabbitMQ");
        Ok(lease)
    } else {
        debug!(generation, "Connection shut down while connecting; closing");
        lease.connection.close().await.ok();
        Err(PublisherError::Connection(
            "Connection was shut down while connecting".to_string(),
        ))
    }
}
