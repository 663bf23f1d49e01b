//! The message envelope.
//!
//! A [`Message`] is immutable once built and is moved by value across task
//! boundaries; nothing in the hub inspects `data`.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// A project identifier. Only ever used as a registry key.
pub type ProjectId = String;

/// Well-known message types sent by the editor.
///
/// The `type` tag is open-ended; these are the ones the editor emits today.
pub mod message_type {
    pub const EDIT: &str = "edit";
    pub const UPDATE: &str = "update";
    pub const CURSOR: &str = "cursor";
    pub const JOIN: &str = "join";
    pub const LEAVE: &str = "leave";
}

/// Milliseconds since the Unix epoch.
#[must_use]
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

/// A collaboration message.
///
/// Inbound frames from clients may leave out everything except `type`; the
/// connection fills in the project and user it is bound to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Target project.
    #[serde(default)]
    pub project_id: ProjectId,
    /// Message type tag (`edit`, `cursor`, `join`, ...).
    #[serde(rename = "type")]
    pub kind: String,
    /// Originating user.
    #[serde(default)]
    pub user_id: String,
    /// Application payload.
    #[serde(default)]
    pub data: serde_json::Value,
    /// Creation time in milliseconds since the Unix epoch.
    #[serde(default)]
    pub timestamp: i64,
}

impl Message {
    /// Create a message stamped with the current time.
    #[must_use]
    pub fn new(
        project_id: impl Into<ProjectId>,
        kind: impl Into<String>,
        user_id: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            kind: kind.into(),
            user_id: user_id.into(),
            data,
            timestamp: now_millis(),
        }
    }

    /// Replace the timestamp.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Bind the message to a connection's identity.
    ///
    /// Project and user always come from the connection, never from the
    /// client. A missing timestamp is set to now.
    #[must_use]
    pub fn with_identity(mut self, project_id: &str, user_id: &str) -> Self {
        self.project_id = project_id.to_string();
        self.user_id = user_id.to_string();
        if self.timestamp == 0 {
            self.timestamp = now_millis();
        }
        self
    }

    /// Presence notice for a user joining a project.
    #[must_use]
    pub fn join(project_id: impl Into<ProjectId>, user_id: impl Into<String>) -> Self {
        let user_id = user_id.into();
        let data = serde_json::json!({ "userId": user_id });
        Self::new(project_id, message_type::JOIN, user_id, data)
    }

    /// Presence notice for a user leaving a project.
    #[must_use]
    pub fn leave(project_id: impl Into<ProjectId>, user_id: impl Into<String>) -> Self {
        let user_id = user_id.into();
        let data = serde_json::json!({ "userId": user_id });
        Self::new(project_id, message_type::LEAVE, user_id, data)
    }
}
