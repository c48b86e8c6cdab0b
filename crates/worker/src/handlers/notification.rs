//! Handler for [`Classification::Notification`](maintenance_messaging::Classification).
//!
//! Delivering the notification is simulated: the handler logs it and then
//! spends the configured work delay before reporting success.

use std::time::Duration;

use async_trait::async_trait;
use maintenance_core::notification::TaskNotification;
use maintenance_messaging::{Handler, HandlerError, Message};

pub struct NotificationHandler {
    work_delay: Duration,
}

impl NotificationHandler {
    pub fn new(work_delay: Duration) -> Self {
        Self { work_delay }
    }
}

#[async_trait]
impl Handler for NotificationHandler {
    async fn handle(&self, message: &Message) -> Result<(), HandlerError> {
        let notification: TaskNotification = message.decode().map_err(|e| {
            tracing::warn!(
                delivery_tag = message.delivery_tag(),
                error = %e,
                "Failed to decode task notification",
            );
            HandlerError::from(e)
        })?;

        tracing::info!(
            nickname = %notification.nickname,
            task_id = %notification.task_id,
            task_date = %notification.task_date.to_rfc3339(),
            email = %notification.email,
            redelivered = message.redelivered(),
            "Technician {} performed task {} on {}",
            notification.nickname,
            notification.task_id,
            notification.task_date.format("%Y-%m-%d %H:%M:%S"),
        );

        tokio::time::sleep(self.work_delay).await;
        Ok(())
    }
}
