//! Producer side of the pipeline.
//!
//! Business logic depends on the [`Publisher`] trait, injected as
//! `Arc<dyn Publisher>`. [`AmqpPublisher`] talks to the broker;
//! [`InMemoryPublisher`] records batches for tests.
//!
//! A batch is all-or-nothing from the caller's point of view: any error means
//! the caller must treat the whole batch as not delivered, even though
//! messages published before the failure may already sit in the queue.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use lapin::options::{BasicPublishOptions, ConfirmSelectOptions};
use lapin::Channel;
use serde::Serialize;

use crate::config::BrokerConfig;
use crate::connection::{self, BrokerConnection};
use crate::envelope::{Classification, Envelope};

/// Error type for a failed publish call. One variant per failing step.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PublishError {
    #[error("failed to connect to broker: {0}")]
    ConnectFailed(String),

    #[error("failed to open a channel: {0}")]
    ChannelFailed(String),

    #[error("failed to declare a queue: {0}")]
    QueueDeclareFailed(String),

    #[error("failed to encode a message: {0}")]
    EncodeFailed(String),

    #[error("failed to publish a message: {0}")]
    PublishFailed(String),
}

/// Publishes batches of JSON records under one classification.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish `records` in order. On `Ok` every message has been accepted
    /// by the broker; an empty batch is a no-op.
    async fn publish(
        &self,
        records: &[serde_json::Value],
        classification: Classification,
    ) -> Result<(), PublishError>;
}

/// Serialize typed records and publish them through `publisher`.
pub async fn publish_records<T: Serialize>(
    publisher: &dyn Publisher,
    records: &[T],
    classification: Classification,
) -> Result<(), PublishError> {
    let values = records
        .iter()
        .map(serde_json::to_value)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| PublishError::EncodeFailed(e.to_string()))?;
    publisher.publish(&values, classification).await
}

// ---------------------------------------------------------------------------
// AmqpPublisher
// ---------------------------------------------------------------------------

/// Publisher that opens a fresh connection per call.
///
/// Publishing runs inside request handling, so there is exactly one connect
/// attempt per call and no retry.
pub struct AmqpPublisher {
    config: BrokerConfig,
}

impl AmqpPublisher {
    pub fn new(config: BrokerConfig) -> Self {
        Self { config }
    }

    async fn publish_on(
        &self,
        connection: &BrokerConnection,
        records: &[serde_json::Value],
        classification: Classification,
    ) -> Result<(), PublishError> {
        let channel = connection
            .create_channel()
            .await
            .map_err(|e| PublishError::ChannelFailed(e.to_string()))?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| PublishError::ChannelFailed(e.to_string()))?;
        connection::declare_queue(&channel, &self.config.queue)
            .await
            .map_err(|e| PublishError::QueueDeclareFailed(e.to_string()))?;

        let channel = &channel;
        publish_envelopes(
            records,
            classification,
            self.config.publish_timeout,
            |envelope| self.publish_one(channel, envelope),
        )
        .await?;

        if let Err(e) = channel.close(200, "publish complete").await {
            tracing::debug!(error = %e, "Failed to close publish channel");
        }
        Ok(())
    }

    /// Publish one envelope and wait for the broker's confirm.
    async fn publish_one(&self, channel: &Channel, envelope: Envelope) -> Result<(), PublishError> {
        let confirm = channel
            .basic_publish(
                "",
                &self.config.queue,
                BasicPublishOptions::default(),
                &envelope.body,
                envelope.properties(),
            )
            .await
            .map_err(|e| PublishError::PublishFailed(e.to_string()))?;

        let confirmation = confirm
            .await
            .map_err(|e| PublishError::PublishFailed(e.to_string()))?;
        if confirmation.is_nack() {
            return Err(PublishError::PublishFailed(
                "broker did not accept the message".into(),
            ));
        }

        tracing::debug!(
            queue = %self.config.queue,
            classification = %envelope.classification,
            bytes = envelope.body.len(),
            "Sent message",
        );
        Ok(())
    }
}

/// Encode and send `records` in order through `send`. The whole batch
/// shares one deadline, `timeout` after the call starts.
///
/// Stops at the first failure; later records are never sent. An elapsed
/// deadline is reported as [`PublishError::PublishFailed`].
async fn publish_envelopes<F, Fut>(
    records: &[serde_json::Value],
    classification: Classification,
    timeout: Duration,
    mut send: F,
) -> Result<(), PublishError>
where
    F: FnMut(Envelope) -> Fut,
    Fut: Future<Output = Result<(), PublishError>>,
{
    let deadline = tokio::time::Instant::now() + timeout;

    for record in records {
        let envelope = Envelope::encode(record, classification)
            .map_err(|e| PublishError::EncodeFailed(e.to_string()))?;

        tokio::time::timeout_at(deadline, send(envelope))
            .await
            .map_err(|_| {
                PublishError::PublishFailed(format!("publish deadline of {timeout:?} exceeded"))
            })??;
    }
    Ok(())
}

#[async_trait]
impl Publisher for AmqpPublisher {
    async fn publish(
        &self,
        records: &[serde_json::Value],
        classification: Classification,
    ) -> Result<(), PublishError> {
        if records.is_empty() {
            return Ok(());
        }

        let connection = connection::connect(&self.config)
            .await
            .map_err(|e| PublishError::ConnectFailed(e.to_string()))?;

        let result = self.publish_on(&connection, records, classification).await;
        connection.close("publish complete").await;

        match &result {
            Ok(()) => tracing::info!(
                count = records.len(),
                %classification,
                queue = %self.config.queue,
                "Published batch",
            ),
            Err(e) => tracing::error!(error = %e, %classification, "Failed to publish batch"),
        }
        result
    }
}

// ---------------------------------------------------------------------------
// InMemoryPublisher
// ---------------------------------------------------------------------------

/// One batch captured by [`InMemoryPublisher`].
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedBatch {
    pub classification: Classification,
    pub envelopes: Vec<Envelope>,
}

/// Publisher that keeps batches in memory, optionally failing every call.
#[derive(Default)]
pub struct InMemoryPublisher {
    batches: Mutex<Vec<PublishedBatch>>,
    failure: Option<PublishError>,
}

impl InMemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// A publisher whose every non-empty publish fails with `error`.
    pub fn failing(error: PublishError) -> Self {
        Self {
            batches: Mutex::default(),
            failure: Some(error),
        }
    }

    /// Batches published so far, oldest first.
    pub fn batches(&self) -> Vec<PublishedBatch> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<PublishedBatch>> {
        // A poisoned lock only means another test thread panicked mid-push.
        self.batches
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Publisher for InMemoryPublisher {
    async fn publish(
        &self,
        records: &[serde_json::Value],
        classification: Classification,
    ) -> Result<(), PublishError> {
        if records.is_empty() {
            return Ok(());
        }
        if let Some(error) = &self.failure {
            return Err(error.clone());
        }

        let envelopes = records
            .iter()
            .map(|record| Envelope::encode(record, classification))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| PublishError::EncodeFailed(e.to_string()))?;

        self.lock().push(PublishedBatch {
            classification,
            envelopes,
        });
        Ok(())
    }
}
