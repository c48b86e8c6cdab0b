//! Shutdown coordination.
//!
//! The consumer stops taking deliveries for one of four reasons, reported
//! as a [`ShutdownReason`]. OS signals are turned into a cancelled
//! [`CancellationToken`] by [`cancel_on_signal`]; the dispatcher watches that
//! token alongside the broker-closure token.

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Why the consumer stopped pulling deliveries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// A termination signal arrived or the caller cancelled the consumer.
    Signal,
    /// The broker closed the connection unexpectedly.
    ConnectionClosed,
    /// The broker ended the subscription (consumer cancelled on its side).
    SubscriptionEnded,
    /// The delivery stream reported an error.
    StreamFailed(String),
}

/// Wait for SIGINT (Ctrl-C) or, on Unix, SIGTERM.
///
/// If a handler cannot be installed the error is logged and that signal is
/// simply never observed.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}

/// Cancel `token` when a termination signal arrives.
pub fn cancel_on_signal(token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = token.cancelled() => {}
            () = shutdown_signal() => token.cancel(),
        }
    })
}

/// Cancel `token` and wait for the listener spawned by [`cancel_on_signal`].
pub async fn stop_signal_listener(token: &CancellationToken, listener: JoinHandle<()>) {
    token.cancel();
    if let Err(e) = listener.await {
        tracing::debug!(error = %e, "Signal listener did not exit cleanly");
    }
}

/// Close-watcher: resolves when shutdown is requested, the connection
/// closes, or the sibling activities of `group` have already stopped.
///
/// Always cancels `group` before returning so every sibling stops intake.
pub(crate) async fn watch(
    shutdown: &CancellationToken,
    closed: &CancellationToken,
    group: &CancellationToken,
) -> Option<ShutdownReason> {
    let reason = tokio::select! {
        _ = shutdown.cancelled() => {
            tracing::info!("Shutting down consumer");
            Some(ShutdownReason::Signal)
        }
        _ = closed.cancelled() => {
            tracing::warn!("Broker connection closed");
            Some(ShutdownReason::ConnectionClosed)
        }
        _ = group.cancelled() => None,
    };
    group.cancel();
    reason
}
