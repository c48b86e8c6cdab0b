use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use maintenance_messaging::shutdown::{cancel_on_signal, stop_signal_listener};
use maintenance_messaging::AmqpConsumer;
use maintenance_worker::config::WorkerConfig;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "maintenance_worker=debug,maintenance_messaging=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match WorkerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid worker configuration");
            std::process::exit(1);
        }
    };
    tracing::info!(
        broker = %config.broker.redacted_uri(),
        queue = %config.broker.queue,
        "Worker starting",
    );

    let registry = maintenance_worker::registry(&config);
    let consumer = AmqpConsumer::new(config.broker, registry);

    let shutdown = CancellationToken::new();
    let signals = cancel_on_signal(shutdown.clone());

    let result = consumer.run(shutdown.clone()).await;
    stop_signal_listener(&shutdown, signals).await;

    match result {
        Ok(reason) => tracing::info!(?reason, "Worker stopped"),
        Err(e) => {
            tracing::error!(error = %e, "Consumer setup failed");
            std::process::exit(1);
        }
    }
}
