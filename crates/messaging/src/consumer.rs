//! Long-lived AMQP consumer.
//!
//! [`AmqpConsumer::run`] walks the lifecycle
//! `Connecting → Subscribed → Draining → Closed`:
//!
//! 1. connect, retrying with a fixed delay until the broker is reachable;
//! 2. open a channel, declare the queue, set prefetch, start consuming with
//!    manual acknowledgment;
//! 3. hand the delivery stream to the [`Dispatcher`] until a termination
//!    signal or broker closure, then drain in-flight handlers;
//! 4. close the channel and connection.
//!
//! Failures in step 2 are fatal ([`ConsumerError`]): they indicate a broken
//! deployment rather than a transient fault.

use futures::StreamExt;
use lapin::options::{BasicConsumeOptions, BasicQosOptions};
use lapin::types::FieldTable;
use lapin::Channel;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::config::BrokerConfig;
use crate::connection::{self, BrokerConnection};
use crate::delivery::Delivery;
use crate::dispatch::{ConsumerState, Dispatcher};
use crate::registry::HandlerRegistry;
use crate::shutdown::ShutdownReason;

/// Unrecoverable consumer setup failure.
#[derive(Debug, thiserror::Error)]
pub enum ConsumerError {
    #[error("failed to open a channel: {0}")]
    Channel(#[source] lapin::Error),

    #[error("failed to declare queue {queue}: {source}")]
    QueueDeclare {
        queue: String,
        #[source]
        source: lapin::Error,
    },

    #[error("failed to set QoS: {0}")]
    Qos(#[source] lapin::Error),

    #[error("failed to register a consumer on {queue}: {source}")]
    Subscribe {
        queue: String,
        #[source]
        source: lapin::Error,
    },
}

/// Consumer process bound to one durable queue.
pub struct AmqpConsumer {
    config: BrokerConfig,
    dispatcher: Dispatcher,
}

impl AmqpConsumer {
    pub fn new(config: BrokerConfig, registry: HandlerRegistry) -> Self {
        let dispatcher = Dispatcher::new(registry).with_handler_timeout(config.handler_timeout);
        Self { config, dispatcher }
    }

    /// Subscribe to lifecycle transitions.
    pub fn state(&self) -> watch::Receiver<ConsumerState> {
        self.dispatcher.state()
    }

    /// Run until `shutdown` is cancelled or the broker goes away.
    ///
    /// Returns only after every dispatched delivery has been resolved and
    /// the connection has been released.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<ShutdownReason, ConsumerError> {
        self.dispatcher.set_state(ConsumerState::Connecting);

        let Some(connection) = connection::connect_with_retry(&self.config, &shutdown).await else {
            tracing::info!("Shutdown requested before broker connection was established");
            self.dispatcher.mark_closed();
            return Ok(ShutdownReason::Signal);
        };

        let (channel, consumer) = match self.subscribe(&connection).await {
            Ok(subscription) => subscription,
            Err(e) => {
                connection.close("consumer setup failed").await;
                self.dispatcher.mark_closed();
                return Err(e);
            }
        };

        tracing::info!(
            queue = %self.config.queue,
            prefetch = self.config.prefetch,
            "Subscribed to queue",
        );

        let deliveries = consumer.map(|result| result.map(Delivery::from));
        let reason = self
            .dispatcher
            .run(deliveries, connection.closed(), shutdown)
            .await;

        if connection.is_connected() {
            if let Err(e) = channel.close(200, "consumer shutting down").await {
                tracing::warn!(error = %e, "Failed to close consumer channel");
            }
        }
        connection.close("consumer shutting down").await;
        self.dispatcher.mark_closed();

        tracing::info!(?reason, "Consumer closed");
        Ok(reason)
    }

    /// Open a channel, declare the queue, set prefetch, and start consuming.
    async fn subscribe(
        &self,
        connection: &BrokerConnection,
    ) -> Result<(Channel, lapin::Consumer), ConsumerError> {
        let queue = &self.config.queue;

        let channel = connection
            .create_channel()
            .await
            .map_err(ConsumerError::Channel)?;

        connection::declare_queue(&channel, queue)
            .await
            .map_err(|source| ConsumerError::QueueDeclare {
                queue: queue.clone(),
                source,
            })?;

        channel
            .basic_qos(self.config.prefetch, BasicQosOptions { global: false })
            .await
            .map_err(ConsumerError::Qos)?;

        let consumer_tag = format!("{}-{}", env!("CARGO_PKG_NAME"), uuid::Uuid::new_v4());
        let consumer = channel
            .basic_consume(
                queue,
                &consumer_tag,
                BasicConsumeOptions {
                    no_ack: false,
                    exclusive: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|source| ConsumerError::Subscribe {
                queue: queue.clone(),
                source,
            })?;

        Ok((channel, consumer))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn shutdown_while_connecting_goes_straight_to_closed() {
        let consumer = AmqpConsumer::new(
            BrokerConfig {
                host: "127.0.0.1".into(),
                port: 1,
                reconnect_delay: Duration::from_millis(10),
                ..Default::default()
            },
            HandlerRegistry::new(),
        );
        let state = consumer.state();
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let reason = consumer.run(shutdown).await.unwrap();

        assert_eq!(reason, ShutdownReason::Signal);
        assert_eq!(*state.borrow(), ConsumerState::Closed);
    }

    #[test]
    fn setup_errors_name_the_queue() {
        let err = ConsumerError::QueueDeclare {
            queue: "task_queue".into(),
            source: lapin::Error::ChannelsLimitReached,
        };
        assert!(err.to_string().contains("task_queue"));
    }
}
