//! Classification → handler routing table.
//!
//! The worker builds a [`HandlerRegistry`] once at startup and hands it to
//! the [`Dispatcher`](crate::dispatch::Dispatcher). Each [`Handler`] sees a
//! read-only [`Message`]; acknowledging or rejecting the delivery is the
//! dispatcher's job, never the handler's.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::delivery::Message;
use crate::envelope::{Classification, UnknownClassification};

/// Permanent failure reported by a handler.
///
/// Every variant leads to reject-without-requeue; there is no retry path.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// The body could not be decoded into the handler's payload type.
    #[error("failed to decode message body: {0}")]
    Decode(#[from] serde_json::Error),

    /// The handler ran but could not complete its work.
    #[error("handler failed: {0}")]
    Failed(String),
}

/// Business logic invoked for every delivery of one classification.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, message: &Message) -> Result<(), HandlerError>;
}

/// Why a delivery could not be routed to a handler.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouteError {
    #[error("message has no classification header")]
    MissingClassification,

    #[error(transparent)]
    Unknown(#[from] UnknownClassification),

    #[error("no handler registered for classification {0}")]
    Unregistered(Classification),
}

/// Static mapping from [`Classification`] to its [`Handler`].
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<Classification, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `classification`, replacing any previous one.
    pub fn register(
        mut self,
        classification: Classification,
        handler: impl Handler + 'static,
    ) -> Self {
        if self
            .handlers
            .insert(classification, Arc::new(handler))
            .is_some()
        {
            tracing::warn!(%classification, "Handler registered twice, keeping the last one");
        }
        self
    }

    /// Resolve the handler for a raw `controller` header value.
    pub fn resolve(&self, classification: Option<&str>) -> Result<Arc<dyn Handler>, RouteError> {
        let raw = classification.ok_or(RouteError::MissingClassification)?;
        let classification: Classification = raw.parse()?;
        self.handlers
            .get(&classification)
            .cloned()
            .ok_or(RouteError::Unregistered(classification))
    }

    /// Classifications that currently have a handler.
    pub fn classifications(&self) -> Vec<Classification> {
        Classification::ALL
            .into_iter()
            .filter(|c| self.handlers.contains_key(c))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
