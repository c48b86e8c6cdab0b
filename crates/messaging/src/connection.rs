//! Broker connection management.
//!
//! [`connect`] makes exactly one bounded attempt and is what the producer
//! uses on every publish. [`connect_with_retry`] keeps trying with a fixed
//! delay until it succeeds or the [`CancellationToken`] is triggered; the
//! consumer uses it to tolerate the broker starting after the worker.
//!
//! A [`BrokerConnection`] exposes a one-shot closure notification
//! ([`BrokerConnection::closed`]) that fires when the broker drops the
//! connection unexpectedly.

use std::future::Future;
use std::time::Duration;

use lapin::options::QueueDeclareOptions;
use lapin::types::{FieldTable, LongString};
use lapin::{Channel, Connection, ConnectionProperties, Queue};
use tokio_util::sync::CancellationToken;

use crate::config::BrokerConfig;

/// Error type for connection establishment.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    /// The broker refused the connection or the handshake failed.
    #[error("failed to connect to broker at {uri}: {source}")]
    Broker {
        uri: String,
        #[source]
        source: lapin::Error,
    },

    /// The attempt did not complete within the connect timeout.
    #[error("timed out connecting to broker at {uri} after {timeout:?}")]
    Timeout { uri: String, timeout: Duration },
}

/// A live AMQP connection plus its closure notification.
pub struct BrokerConnection {
    connection: Connection,
    closed: CancellationToken,
}

impl BrokerConnection {
    /// Wrap a freshly opened connection and hook its error callback.
    fn new(connection: Connection) -> Self {
        let closed = CancellationToken::new();
        let notify = closed.clone();
        connection.on_error(move |err| {
            tracing::error!(error = %err, "Broker connection closed unexpectedly");
            notify.cancel();
        });
        Self { connection, closed }
    }

    /// Token cancelled when the broker closes the connection unexpectedly.
    ///
    /// Once it fires the connection must not be reused.
    pub fn closed(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// Whether the connection is still usable for channel operations.
    pub fn is_connected(&self) -> bool {
        !self.closed.is_cancelled() && self.connection.status().connected()
    }

    /// Open a new channel on this connection.
    pub async fn create_channel(&self) -> Result<Channel, lapin::Error> {
        self.connection.create_channel().await
    }

    /// Close the connection with a normal reply code.
    ///
    /// Errors are logged and swallowed: there is nothing left to release.
    pub async fn close(self, reason: &str) {
        if !self.connection.status().connected() {
            tracing::debug!(reason, "Broker connection already closed");
            return;
        }
        if let Err(e) = self.connection.close(200, reason).await {
            tracing::warn!(error = %e, reason, "Failed to close broker connection cleanly");
        }
    }
}

/// Make one connection attempt, bounded by `config.connect_timeout`.
pub async fn connect(config: &BrokerConfig) -> Result<BrokerConnection, ConnectError> {
    let uri = config.amqp_uri();
    let properties = ConnectionProperties::default()
        .with_connection_name(LongString::from(env!("CARGO_PKG_NAME")));

    match tokio::time::timeout(config.connect_timeout, Connection::connect(&uri, properties)).await
    {
        Ok(Ok(connection)) => {
            tracing::debug!(uri = %config.redacted_uri(), "Connected to broker");
            Ok(BrokerConnection::new(connection))
        }
        Ok(Err(source)) => Err(ConnectError::Broker {
            uri: config.redacted_uri(),
            source,
        }),
        Err(_) => Err(ConnectError::Timeout {
            uri: config.redacted_uri(),
            timeout: config.connect_timeout,
        }),
    }
}

/// Connect, retrying every `config.reconnect_delay` until it succeeds.
///
/// Returns `None` if `cancel` is triggered before a connection is made.
pub async fn connect_with_retry(
    config: &BrokerConfig,
    cancel: &CancellationToken,
) -> Option<BrokerConnection> {
    let connection = retry(config.reconnect_delay, cancel, || connect(config)).await?;
    tracing::info!(uri = %config.redacted_uri(), "Connected to broker");
    Some(connection)
}

/// Run `attempt` until it succeeds, sleeping `delay` after each failure.
async fn retry<T, F, Fut>(delay: Duration, cancel: &CancellationToken, mut attempt: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ConnectError>>,
{
    let mut attempts = 0u32;

    loop {
        if cancel.is_cancelled() {
            return None;
        }
        attempts += 1;

        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!(attempts, "Connect cancelled");
                return None;
            }
            result = attempt() => match result {
                Ok(value) => {
                    tracing::debug!(attempts, "Connect attempt succeeded");
                    return Some(value);
                }
                Err(e) => tracing::warn!(
                    error = %e,
                    attempt = attempts,
                    retry_in_secs = delay.as_secs(),
                    "Error connecting to broker, retrying",
                ),
            },
        }

        tokio::select! {
            _ = cancel.cancelled() => return None,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// Declare the shared durable queue.
///
/// Durable, not exclusive, not auto-deleted. Re-declaring with the same
/// parameters is a no-op on the broker; conflicting parameters fail.
pub async fn declare_queue(channel: &Channel, queue: &str) -> Result<Queue, lapin::Error> {
    channel
        .queue_declare(
            queue,
            QueueDeclareOptions {
                durable: true,
                exclusive: false,
                auto_delete: false,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
}
