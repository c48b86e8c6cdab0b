//! Durable-queue notification pipeline.
//!
//! This crate is the client side of the AMQP broker protocol shared by the
//! API (producer) and the worker (consumer):
//!
//! - [`envelope`]: message body encoding and the `controller` routing header.
//! - [`config`]: broker connection settings loaded from the environment.
//! - [`connection`]: single-shot and retrying connects, closure notification.
//! - [`producer`]: the injectable [`Publisher`] and its AMQP implementation.
//! - [`delivery`]: the consumer-side [`Delivery`] handle, resolved exactly once.
//! - [`registry`]: classification → [`Handler`] routing table.
//! - [`dispatch`]: the bounded-concurrency dispatch loop and drain.
//! - [`consumer`]: the long-lived AMQP consumer built on the dispatcher.
//! - [`shutdown`]: termination signal and broker-closure coordination.

pub mod config;
pub mod connection;
pub mod consumer;
pub mod delivery;
pub mod dispatch;
pub mod envelope;
pub mod producer;
pub mod registry;
pub mod shutdown;

pub use config::{BrokerConfig, ConfigError};
pub use consumer::{AmqpConsumer, ConsumerError};
pub use delivery::{AckError, Acknowledger, Delivery, Message};
pub use dispatch::{ConsumerState, Dispatcher};
pub use envelope::{Classification, Envelope};
pub use producer::{AmqpPublisher, InMemoryPublisher, PublishError, Publisher};
pub use registry::{Handler, HandlerError, HandlerRegistry, RouteError};
pub use shutdown::ShutdownReason;
