//! Handlers for task notifications.
//!
//! Recording a task fans out one notification per manager and publishes the
//! batch to the notification queue. Delivery itself happens in the worker.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidateEmail, ValidationError};

use maintenance_core::error::CoreError;
use maintenance_core::notification::TaskNotification;
use maintenance_core::types::Timestamp;
use maintenance_messaging::producer::publish_records;
use maintenance_messaging::Classification;

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

/// Request body for `POST /api/v1/notifications/tasks`.
#[derive(Debug, Deserialize, Validate)]
pub struct TaskNotificationRequest {
    #[validate(length(min = 1, message = "nickname must not be empty"))]
    pub nickname: String,
    #[validate(length(min = 1, message = "task_id must not be empty"))]
    pub task_id: String,
    pub task_date: Timestamp,
    /// Manager email addresses. May be empty.
    #[validate(custom(function = "validate_recipients"))]
    pub recipients: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct PublishSummary {
    pub published: usize,
}

fn validate_recipients(recipients: &[String]) -> Result<(), ValidationError> {
    if recipients.iter().all(|r| r.validate_email()) {
        Ok(())
    } else {
        Err(ValidationError::new("email")
            .with_message("every recipient must be a valid email address".into()))
    }
}

/// POST /api/v1/notifications/tasks
///
/// Publish one notification per recipient. Returns 202 once the broker has
/// accepted the whole batch; any publish failure fails the request.
pub async fn publish_task_notifications(
    State(state): State<AppState>,
    payload: Result<Json<TaskNotificationRequest>, JsonRejection>,
) -> AppResult<impl IntoResponse> {
    let Json(input) = payload?;
    input.validate().map_err(CoreError::from)?;

    let notifications = TaskNotification::fan_out(
        &input.nickname,
        &input.task_id,
        input.task_date,
        &input.recipients,
    );

    if !notifications.is_empty() {
        publish_records(
            state.publisher.as_ref(),
            &notifications,
            Classification::Notification,
        )
        .await?;
    }

    tracing::info!(
        task_id = %input.task_id,
        nickname = %input.nickname,
        published = notifications.len(),
        "Task notifications published",
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(DataResponse {
            data: PublishSummary {
                published: notifications.len(),
            },
        }),
    ))
}
