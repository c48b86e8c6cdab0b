//! Task notification payload.
//!
//! When a technician records a task, every manager receives one
//! [`TaskNotification`]. The API serializes it into a message body and the
//! worker decodes it back, so the field names here are the wire format.

use serde::{Deserialize, Serialize};

use crate::types::Timestamp;

/// "Technician `nickname` performed task `task_id` on `task_date`",
/// addressed to the manager at `email`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskNotification {
    /// Nickname of the technician who performed the task.
    pub nickname: String,
    /// Task identifier, carried as a string on the wire.
    pub task_id: String,
    /// When the task was performed (RFC 3339).
    pub task_date: Timestamp,
    /// Recipient manager's email address.
    pub email: String,
}

impl TaskNotification {
    /// Build one notification per recipient for the same task.
    pub fn fan_out<I, S>(
        nickname: &str,
        task_id: &str,
        task_date: Timestamp,
        recipients: I,
    ) -> Vec<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        recipients
            .into_iter()
            .map(|email| Self {
                nickname: nickname.to_string(),
                task_id: task_id.to_string(),
                task_date,
                email: email.into(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    fn task_date() -> Timestamp {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap()
    }

    #[test]
    fn fan_out_builds_one_notification_per_recipient() {
        let notes = TaskNotification::fan_out(
            "tech",
            "17",
            task_date(),
            ["a@example.com", "b@example.com"],
        );

        assert_eq!(notes.len(), 2);
        assert_eq!(notes[0].email, "a@example.com");
        assert_eq!(notes[1].email, "b@example.com");
        assert!(notes.iter().all(|n| n.nickname == "tech" && n.task_id == "17"));
    }

    #[test]
    fn fan_out_with_no_recipients_is_empty() {
        let notes = TaskNotification::fan_out("tech", "17", task_date(), Vec::<String>::new());
        assert!(notes.is_empty());
    }

    #[test]
    fn wire_format_uses_snake_case_fields_and_rfc3339_date() {
        let note = TaskNotification {
            nickname: "tech".into(),
            task_id: "17".into(),
            task_date: task_date(),
            email: "m@example.com".into(),
        };

        let json = serde_json::to_value(&note).unwrap();
        assert_eq!(json["nickname"], "tech");
        assert_eq!(json["task_id"], "17");
        assert_eq!(json["task_date"], "2024-03-01T09:30:00Z");
        assert_eq!(json["email"], "m@example.com");

        let back: TaskNotification = serde_json::from_value(json).unwrap();
        assert_eq!(back, note);
    }
}
