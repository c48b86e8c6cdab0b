pub mod health;
pub mod notifications;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// ```text
/// /notifications/tasks        publish task notifications (POST)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new().nest("/notifications", notifications::router())
}
