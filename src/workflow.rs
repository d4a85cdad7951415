//! Persist-then-publish with a compensating delete.
//!
//! There is no transaction spanning the datastore and the broker. When the
//! event cannot be published the record is deleted again; when that delete
//! also fails the record is orphaned, which is logged and returned as an
//! error rather than hidden.

use async_trait::async_trait;
use serde::Serialize;
use std::fmt::Display;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::rabbitmq::{PublishCoordinator, PublishReceipt, PublisherError};

pub const RECORD_CREATED: &str = "record.created";

/// Storage for the records whose creation is announced on the broker.
#[async_trait]
pub trait RecordStore: Send + Sync {
    type Record: Serialize + Send + Sync;
    type Key: Serialize + Display + Clone + Send + Sync;

    async fn persist(&self, record: &Self::Record) -> anyhow::Result<Self::Key>;

    async fn delete(&self, key: &Self::Key) -> anyhow::Result<()>;
}

/// Anything that can publish a JSON event and report an honest outcome.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish_event<T>(&self, payload: &T) -> Result<PublishReceipt, PublisherError>
    where
        T: Serialize + Send + Sync + ?Sized;
}

#[async_trait]
impl EventSink for PublishCoordinator {
    async fn publish_event<T>(&self, payload: &T) -> Result<PublishReceipt, PublisherError>
    where
        T: Serialize + Send + Sync + ?Sized,
    {
        self.publish(payload).await
    }
}

/// The event body published for a newly created record.
#[derive(Debug, Serialize)]
pub struct RecordEvent<'a, K, R> {
    pub event_type: &'static str,
    pub key: &'a K,
    pub record: &'a R,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PublicationReport {
    pub persisted: bool,
    pub published: bool,
    pub compensated: bool,
}

#[derive(Debug)]
pub struct Created<K> {
    pub key: K,
    pub receipt: PublishReceipt,
    pub report: PublicationReport,
}

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Failed to persist record: {0}")]
    Persist(#[source] anyhow::Error),

    #[error("Record {key} was rolled back because its event could not be published: {source}")]
    PublishFailed {
        key: String,
        report: PublicationReport,
        #[source]
        source: PublisherError,
    },

    #[error("Record {key} is orphaned: publish failed ({publish}) and rollback failed ({cleanup})")]
    OrphanedRecord {
        key: String,
        report: PublicationReport,
        publish: PublisherError,
        #[source]
        cleanup: anyhow::Error,
    },
}

impl WorkflowError {
    pub fn report(&self) -> PublicationReport {
        match self {
            WorkflowError::Persist(_) => PublicationReport::default(),
            WorkflowError::PublishFailed { report, .. } => *report,
            WorkflowError::OrphanedRecord { report, .. } => *report,
        }
    }
}

/// Runs the persist → publish → compensate sequence.
pub struct CompensatingPublisher<S, P> {
    store: S,
    sink: P,
}

impl<S, P> CompensatingPublisher<S, P>
where
    S: RecordStore,
    P: EventSink,
{
    pub fn new(store: S, sink: P) -> Self {
        Self { store, sink }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn sink(&self) -> &P {
        &self.sink
    }

    pub async fn create(&self, record: &S::Record) -> Result<Created<S::Key>, WorkflowError> {
        let key = self.store.persist(record).await.map_err(WorkflowError::Persist)?;
        let mut report = PublicationReport {
            persisted: true,
            ..PublicationReport::default()
        };

        let event = RecordEvent {
            event_type: RECORD_CREATED,
            key: &key,
            record,
        };

        let publish_error = match self.sink.publish_event(&event).await {
            Ok(receipt) => {
                report.published = true;
                info!(key = %key, message_id = %receipt.message_id, "Record created and announced");
                return Ok(Created {
                    key,
                    receipt,
                    report,
                });
            }
            Err(err) => err,
        };

        warn!(key = %key, error = %publish_error, "Event not published; rolling back record");

        match self.store.delete(&key).await {
            Ok(()) => {
                report.compensated = true;
                Err(WorkflowError::PublishFailed {
                    key: key.to_string(),
                    report,
                    source: publish_error,
                })
            }
            Err(cleanup) => {
                error!(
                    key = %key,
                    publish_error = %publish_error,
                    cleanup_error = %cleanup,
                    "CRITICAL: record persisted without its event and rollback failed"
                );
                Err(WorkflowError::OrphanedRecord {
                    key: key.to_string(),
                    report,
                    publish: publish_error,
                    cleanup,
                })
            }
        }
    }
}
