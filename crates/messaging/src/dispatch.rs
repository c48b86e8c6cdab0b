//! Bounded-concurrency dispatch loop.
//!
//! [`Dispatcher::run`] supervises two activities under one cancellation
//! group: the close-watcher ([`shutdown::watch`]) and the delivery-pull loop.
//! Every routable delivery is handed to its [`Handler`] on a task spawned on
//! a [`TaskTracker`]; the tracker is the in-flight set. Concurrency is not
//! capped here: the broker's prefetch limit bounds how many unresolved
//! deliveries can exist at once.
//!
//! Once either activity stops, intake stops, the tracker is closed, and
//! `run` waits for it to empty before returning. In-flight handlers are never
//! cancelled.

use std::any::Any;
use std::fmt::Display;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::{FutureExt, Stream, StreamExt};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::delivery::{Delivery, Message};
use crate::registry::{Handler, HandlerError, HandlerRegistry};
use crate::shutdown::{self, ShutdownReason};

/// Consumer lifecycle, published through a [`watch`] channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Connecting,
    Subscribed,
    Draining,
    Closed,
}

/// How a handler invocation ended.
#[derive(Debug)]
enum Outcome {
    Completed,
    Failed(HandlerError),
    Panicked(String),
    TimedOut(Duration),
}

/// Routes deliveries to handlers and tracks them until resolved.
pub struct Dispatcher {
    registry: Arc<HandlerRegistry>,
    tracker: TaskTracker,
    state: watch::Sender<ConsumerState>,
    handler_timeout: Option<Duration>,
}

impl Dispatcher {
    pub fn new(registry: HandlerRegistry) -> Self {
        let (state, _) = watch::channel(ConsumerState::Connecting);
        Self {
            registry: Arc::new(registry),
            tracker: TaskTracker::new(),
            state,
            handler_timeout: None,
        }
    }

    /// Reject deliveries whose handler runs longer than `timeout`.
    pub fn with_handler_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.handler_timeout = timeout;
        self
    }

    /// Subscribe to lifecycle transitions.
    pub fn state(&self) -> watch::Receiver<ConsumerState> {
        self.state.subscribe()
    }

    /// Number of deliveries currently being handled.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    pub(crate) fn set_state(&self, state: ConsumerState) {
        self.state.send_replace(state);
    }

    /// Consume `deliveries` until shutdown, then drain.
    ///
    /// `closed` is the broker-closure notification; `shutdown` is cancelled
    /// on a termination signal or by the caller. Returns once every
    /// dispatched delivery has been resolved. The state is left at
    /// [`ConsumerState::Draining`]; releasing the connection is the caller's
    /// job.
    pub async fn run<S, E>(
        &self,
        deliveries: S,
        closed: CancellationToken,
        shutdown: CancellationToken,
    ) -> ShutdownReason
    where
        S: Stream<Item = Result<Delivery, E>>,
        E: Display,
    {
        self.set_state(ConsumerState::Subscribed);
        tracing::info!("Waiting for messages");

        let group = shutdown.child_token();
        let watcher = shutdown::watch(&shutdown, &closed, &group);
        let pull = async {
            let reason = self.pull(deliveries, &group).await;
            group.cancel();
            reason
        };
        let (watched, pulled) = tokio::join!(watcher, pull);

        self.set_state(ConsumerState::Draining);
        self.tracker.close();
        tracing::info!(in_flight = self.tracker.len(), "Awaiting final messages");
        self.tracker.wait().await;
        tracing::info!("All in-flight deliveries resolved");

        pulled.or(watched).unwrap_or(ShutdownReason::Signal)
    }

    /// Mark the consumer closed once the connection has been released.
    pub fn mark_closed(&self) {
        self.set_state(ConsumerState::Closed);
    }

    /// Delivery-pull loop. Returns `None` when stopped by the group,
    /// otherwise the reason the stream itself ended.
    async fn pull<S, E>(&self, deliveries: S, group: &CancellationToken) -> Option<ShutdownReason>
    where
        S: Stream<Item = Result<Delivery, E>>,
        E: Display,
    {
        let mut deliveries = std::pin::pin!(deliveries);

        loop {
            let next = tokio::select! {
                biased;
                _ = group.cancelled() => return None,
                next = deliveries.next() => next,
            };

            match next {
                Some(Ok(delivery)) => self.dispatch(delivery).await,
                Some(Err(e)) => {
                    tracing::error!(error = %e, "Delivery stream failed");
                    return Some(ShutdownReason::StreamFailed(e.to_string()));
                }
                None => {
                    tracing::warn!("Delivery stream ended");
                    return Some(ShutdownReason::SubscriptionEnded);
                }
            }
        }
    }

    /// Route one delivery: spawn its handler, or reject it if unroutable.
    async fn dispatch(&self, delivery: Delivery) {
        let delivery_tag = delivery.delivery_tag();
        let route = self.registry.resolve(delivery.message().classification());

        match route {
            Ok(handler) => {
                self.tracker
                    .spawn(process(delivery, handler, self.handler_timeout));
            }
            Err(e) => {
                // Unroutable messages are a deployment bug: nothing will
                // ever handle them, so requeueing would loop forever.
                tracing::error!(
                    delivery_tag,
                    classification = ?delivery.message().classification(),
                    error = %e,
                    "Controller not found, rejecting delivery",
                );
                if let Err(e) = delivery.reject().await {
                    tracing::error!(delivery_tag, error = %e, "Failed to reject delivery");
                }
            }
        }
    }
}

/// Run one handler and resolve its delivery exactly once.
async fn process(delivery: Delivery, handler: Arc<dyn Handler>, timeout: Option<Duration>) {
    let delivery_tag = delivery.delivery_tag();
    let outcome = invoke(handler.as_ref(), delivery.message(), timeout).await;

    let resolution = match outcome {
        Outcome::Completed => {
            tracing::debug!(delivery_tag, "Acknowledging message");
            delivery.ack().await
        }
        Outcome::Failed(e) => {
            tracing::warn!(delivery_tag, error = %e, "Handler failed, rejecting delivery");
            delivery.reject().await
        }
        Outcome::Panicked(panic) => {
            tracing::error!(delivery_tag, panic = %panic, "Handler panicked, rejecting delivery");
            delivery.reject().await
        }
        Outcome::TimedOut(limit) => {
            tracing::error!(
                delivery_tag,
                timeout_ms = limit.as_millis() as u64,
                "Handler timed out, rejecting delivery",
            );
            delivery.reject().await
        }
    };

    if let Err(e) = resolution {
        tracing::error!(delivery_tag, error = %e, "Failed to resolve delivery");
    }
}

async fn invoke(handler: &dyn Handler, message: &Message, timeout: Option<Duration>) -> Outcome {
    let guarded = AssertUnwindSafe(handler.handle(message)).catch_unwind();

    let result = match timeout {
        Some(limit) => match tokio::time::timeout(limit, guarded).await {
            Ok(result) => result,
            Err(_) => return Outcome::TimedOut(limit),
        },
        None => guarded.await,
    };

    match result {
        Ok(Ok(())) => Outcome::Completed,
        Ok(Err(e)) => Outcome::Failed(e),
        Err(payload) => Outcome::Panicked(panic_message(payload.as_ref())),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
