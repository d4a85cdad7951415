use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::rabbitmq::errors::Result;

pub const JSON_CONTENT_TYPE: &str = "application/json";

/// A serialized event ready for the broker. Built once per publish call and
/// never mutated; retries resend the same bytes and the same id.
#[derive(Clone, Debug)]
pub struct OutboundMessage {
    id: Uuid,
    created_at: DateTime<Utc>,
    body: Arc<[u8]>,
    persistent: bool,
}

impl OutboundMessage {
    /// Serializes `payload` as JSON into a persistent message.
    pub fn from_json<T: Serialize + ?Sized>(payload: &T) -> Result<Self> {
        let body = serde_json::to_vec(payload)?;
        Ok(Self::new(body, true))
    }

    pub fn new(body: Vec<u8>, persistent: bool) -> Self {
        OutboundMessage {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            body: body.into(),
            persistent,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Whether the broker should write the message to disk.
    pub fn is_persistent(&self) -> bool {
        self.persistent
    }

    pub fn content_type(&self) -> &'static str {
        JSON_CONTENT_TYPE
    }
}
