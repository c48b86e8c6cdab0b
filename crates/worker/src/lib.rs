//! Notification worker: consumes the task queue and runs the registered
//! handlers.

pub mod config;
pub mod handlers;

use maintenance_messaging::{Classification, HandlerRegistry};

use crate::config::WorkerConfig;
use crate::handlers::notification::NotificationHandler;

/// Routing table used by the worker binary.
pub fn registry(config: &WorkerConfig) -> HandlerRegistry {
    HandlerRegistry::new().register(
        Classification::Notification,
        NotificationHandler::new(config.work_delay),
    )
}
