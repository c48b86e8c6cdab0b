use std::sync::Arc;

use maintenance_messaging::Publisher;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable: every field is behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    /// Producer for the notification queue. Tests inject an in-memory one.
    pub publisher: Arc<dyn Publisher>,
}
