/// Shared types for the group-sharing pipeline
use serde::{Deserialize, Serialize};

/// One shared content entry in the hosted record store.
///
/// Identifiers are server-assigned and strictly increasing; the latest
/// record always carries the maximum id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedRecord {
    pub id: i64,
    pub group_id: String,
    pub sender: String,
    pub content: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    /// RFC3339 creation timestamp
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// Insert payload for a new share
#[derive(Debug, Clone, Serialize)]
pub struct NewShare {
    pub content: String,
    pub group_id: String,
    pub sender: String,
    pub timestamp: String,
    pub title: String,
    pub url: String,
}

/// Reduced payload used by the degraded insert strategies
#[derive(Debug, Clone, Serialize)]
pub struct MinimalShare {
    pub content: String,
    pub group_id: String,
    pub sender: String,
    pub timestamp: String,
}

impl NewShare {
    pub fn minimal(&self) -> MinimalShare {
        MinimalShare {
            content: self.content.clone(),
            group_id: self.group_id.clone(),
            sender: self.sender.clone(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Kind of an in-app notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NotificationKind {
    /// Derived from a newly observed backend record
    Share,
    /// Feedback after a local share went out
    Success,
    /// Diagnostics
    Test,
}

impl NotificationKind {
    /// Identifier prefix for this kind
    pub fn prefix(&self) -> &'static str {
        match self {
            NotificationKind::Share => "share-notification",
            NotificationKind::Success => "success-notification",
            NotificationKind::Test => "test-notification",
        }
    }
}

/// An in-app notification derived from a record or a local event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRecord {
    /// Kind-prefixed, time-suffixed identifier
    pub id: String,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    /// Source-group context line
    pub context: String,
    /// Normalized originating content
    pub content: String,
    pub group_id: String,
    pub timestamp_ms: i64,
}

impl NotificationRecord {
    pub fn new(
        kind: NotificationKind,
        suffix: &str,
        title: &str,
        message: &str,
        context: &str,
        content: &str,
        group_id: &str,
    ) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: format!("{}-{}-{}", kind.prefix(), suffix, now),
            kind,
            title: title.to_string(),
            message: message.to_string(),
            context: context.to_string(),
            content: content.to_string(),
            group_id: group_id.to_string(),
            timestamp_ms: now,
        }
    }
}

/// A locally detected contract address
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activity {
    pub address: String,
    pub chain: String,
    pub timestamp: i64,
    pub shared_by: String,
}

/// One persisted error-log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorLogEntry {
    pub source: String,
    pub message: String,
    #[serde(default)]
    pub detail: Option<serde_json::Value>,
    pub timestamp: String,
}

/// Payload of a success envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessPayload {
    pub content: String,
    pub group_id: String,
    pub url: String,
}

/// Message envelope pushed to attached surfaces (tabs and popups)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum SurfaceMessage {
    ShowInAppNotification {
        notification: NotificationRecord,
        #[serde(rename = "styleType")]
        style_type: String,
    },
    ShowSuccessNotification {
        data: SuccessPayload,
    },
    ClearDbNotifications,
    BroadcastNotification {
        notification: NotificationRecord,
    },
}

/// Which group the local user is associated with, and the logical
/// channels considered active. Torn down and rebuilt on reconnection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubscriptionState {
    pub group_id: Option<String>,
    pub channels: Vec<String>,
}
