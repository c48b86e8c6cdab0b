//! Consumer-side delivery handle.
//!
//! A [`Delivery`] pairs the received [`Message`] with the capability to
//! resolve it. Resolution ([`Delivery::ack`] / [`Delivery::reject`]) takes the
//! delivery by value, so a delivery can be resolved at most once. Handlers
//! only ever see `&Message` and therefore cannot resolve anything.

use async_trait::async_trait;
use lapin::acker::Acker;
use lapin::options::{BasicAckOptions, BasicRejectOptions};
use serde::de::DeserializeOwned;

use crate::envelope::classification_header;

/// Failure to acknowledge or reject a delivery at the broker.
#[derive(Debug, Clone, thiserror::Error)]
#[error("failed to resolve delivery: {0}")]
pub struct AckError(pub String);

impl From<lapin::Error> for AckError {
    fn from(err: lapin::Error) -> Self {
        AckError(err.to_string())
    }
}

/// Broker-side resolution of one delivery.
///
/// Implemented for lapin's [`Acker`]; tests supply in-memory versions.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    /// Acknowledge this single delivery (never `multiple`).
    async fn ack(&self) -> Result<(), AckError>;

    /// Reject this delivery without requeueing it.
    async fn reject(&self) -> Result<(), AckError>;
}

#[async_trait]
impl Acknowledger for Acker {
    async fn ack(&self) -> Result<(), AckError> {
        Acker::ack(self, BasicAckOptions { multiple: false }).await?;
        Ok(())
    }

    async fn reject(&self) -> Result<(), AckError> {
        Acker::reject(self, BasicRejectOptions { requeue: false }).await?;
        Ok(())
    }
}

/// Read-only view of a received message.
#[derive(Debug, Clone)]
pub struct Message {
    body: Vec<u8>,
    classification: Option<String>,
    delivery_tag: u64,
    redelivered: bool,
}

impl Message {
    pub fn new(
        body: Vec<u8>,
        classification: Option<String>,
        delivery_tag: u64,
        redelivered: bool,
    ) -> Self {
        Self {
            body,
            classification,
            delivery_tag,
            redelivered,
        }
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Raw `controller` header value, if present.
    pub fn classification(&self) -> Option<&str> {
        self.classification.as_deref()
    }

    /// Channel-scoped identifier assigned by the broker.
    pub fn delivery_tag(&self) -> u64 {
        self.delivery_tag
    }

    /// Whether the broker has delivered this message before.
    pub fn redelivered(&self) -> bool {
        self.redelivered
    }

    /// Decode the JSON body into `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

/// A received message that still owes the broker exactly one resolution.
pub struct Delivery {
    message: Message,
    acker: Box<dyn Acknowledger>,
    resolved: bool,
}

impl Delivery {
    pub fn new(message: Message, acker: impl Acknowledger + 'static) -> Self {
        Self {
            message,
            acker: Box::new(acker),
            resolved: false,
        }
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn delivery_tag(&self) -> u64 {
        self.message.delivery_tag
    }

    /// Acknowledge the delivery. Consumes the handle.
    pub async fn ack(mut self) -> Result<(), AckError> {
        self.resolved = true;
        self.acker.ack().await
    }

    /// Reject the delivery without requeue. Consumes the handle.
    pub async fn reject(mut self) -> Result<(), AckError> {
        self.resolved = true;
        self.acker.reject().await
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("message", &self.message)
            .field("resolved", &self.resolved)
            .finish()
    }
}

impl Drop for Delivery {
    fn drop(&mut self) {
        if !self.resolved {
            // The broker redelivers it once this channel closes.
            tracing::warn!(
                delivery_tag = self.message.delivery_tag,
                "Delivery dropped without being resolved",
            );
        }
    }
}

impl From<lapin::message::Delivery> for Delivery {
    fn from(delivery: lapin::message::Delivery) -> Self {
        let classification = classification_header(delivery.properties.headers().as_ref());
        let message = Message::new(
            delivery.data,
            classification,
            delivery.delivery_tag,
            delivery.redelivered,
        );
        Delivery::new(message, delivery.acker)
    }
}
