use axum::routing::post;
use axum::Router;

use crate::handlers::notifications;
use crate::state::AppState;

/// Routes mounted at `/api/v1/notifications`.
pub fn router() -> Router<AppState> {
    Router::new().route("/tasks", post(notifications::publish_task_notifications))
}
