/// Notification dispatcher: relevance filter, content normalization,
/// de-duplication, and ordered best-effort fan-out to storage, tab
/// surfaces, the native tray, and popup surfaces.
use crate::store::StateStore;
use crate::surfaces::SurfaceRegistry;
use crate::tray::TrayNotifier;
use crate::types::{
    NotificationKind, NotificationRecord, SharedRecord, SuccessPayload, SurfaceMessage,
};
use tracing::{debug, info, warn};

/// Display budget for in-app toast messages
const TOAST_BUDGET: usize = 100;
/// Shorter budget for native-tray messages
const TRAY_BUDGET: usize = 80;

const SHARE_TITLE: &str = "New Share";
const SHARE_STYLE: &str = "db-notification";

#[derive(Clone)]
pub struct Dispatcher {
    store: StateStore,
    surfaces: SurfaceRegistry,
    tray: TrayNotifier,
}

impl Dispatcher {
    pub fn new(store: StateStore, surfaces: SurfaceRegistry, tray: TrayNotifier) -> Self {
        Self {
            store,
            surfaces,
            tray,
        }
    }

    /// Dispatch a newly observed backend record. Returns whether the record
    /// was relevant (dropped records are not an error).
    pub async fn dispatch_record(&self, record: &SharedRecord) -> bool {
        // Relevance: no local group set, or exact group match
        if let Some(local_group) = self.store.group_id() {
            if local_group != record.group_id {
                info!(
                    "Notification skipped: record from group {}, local user is in group {}",
                    record.group_id, local_group
                );
                return false;
            }
        }

        let content = normalize_content(&record.content);
        let notification = NotificationRecord::new(
            NotificationKind::Share,
            &record.id.to_string(),
            SHARE_TITLE,
            &format!("CA: {}", truncate(&content, TOAST_BUDGET)),
            &format!("Shared by Group: {}", record.group_id),
            &content,
            &record.group_id,
        );
        debug!("Dispatching share notification {}", notification.id);

        // De-duplication: evict prior notifications of the same kind from
        // both scopes before anything is persisted or rendered.
        if let Err(e) = self.store.clear_local_kind(notification.kind) {
            self.store
                .log_error("Dispatch", &format!("Local eviction failed: {}", e), None);
        }
        if let Err(e) = self.store.clear_global_kind(notification.kind) {
            self.store
                .log_error("Dispatch", &format!("Global eviction failed: {}", e), None);
        }

        self.fan_out(&notification).await;
        true
    }

    /// Fan-out, in order, each step best-effort
    async fn fan_out(&self, notification: &NotificationRecord) {
        // (a) local scope, newest first, capped
        if let Err(e) = self.store.push_local_notification(notification) {
            self.store
                .log_error("Dispatch", &format!("Local persist failed: {}", e), None);
        }

        // (b) shared/global scope keyed by id
        if let Err(e) = self.store.put_global_notification(notification) {
            self.store
                .log_error("Dispatch", &format!("Global persist failed: {}", e), None);
        }

        // (c) every open tab: clear same-kind, then render the new one
        self.surfaces
            .send_to_tabs(&SurfaceMessage::ClearDbNotifications)
            .await;
        self.surfaces
            .send_to_tabs(&SurfaceMessage::ShowInAppNotification {
                notification: notification.clone(),
                style_type: SHARE_STYLE.to_string(),
            })
            .await;

        // (d) native tray, with its shorter budget
        self.tray.notify(
            &notification.title,
            &format!("CA: {}", truncate(&notification.content, TRAY_BUDGET)),
            &notification.context,
        );

        // (e) any listening popup
        self.surfaces
            .send_to_popups(&SurfaceMessage::BroadcastNotification {
                notification: notification.clone(),
            })
            .await;
    }

    /// Re-render a previously persisted share notification on all tabs
    /// (startup redisplay after pruning the shared scope).
    pub async fn redisplay(&self, notification: &NotificationRecord) {
        self.surfaces
            .send_to_tabs(&SurfaceMessage::ClearDbNotifications)
            .await;
        self.surfaces
            .send_to_tabs(&SurfaceMessage::ShowInAppNotification {
                notification: notification.clone(),
                style_type: SHARE_STYLE.to_string(),
            })
            .await;
    }

    /// Success feedback after a local share went out
    pub async fn dispatch_success(&self, content: &str, group_id: &str, url: &str) {
        let notification = NotificationRecord::new(
            NotificationKind::Success,
            "share",
            "Content shared successfully!",
            &truncate(content, TOAST_BUDGET),
            &format!("Group: {}", group_id),
            content,
            group_id,
        );

        if let Err(e) = self.store.clear_local_kind(notification.kind) {
            warn!("Success eviction failed: {}", e);
        }
        if let Err(e) = self.store.push_local_notification(&notification) {
            warn!("Success persist failed: {}", e);
        }

        self.surfaces
            .send_to_tabs(&SurfaceMessage::ShowSuccessNotification {
                data: SuccessPayload {
                    content: content.to_string(),
                    group_id: group_id.to_string(),
                    url: url.to_string(),
                },
            })
            .await;
        self.tray.notify(
            "CA shared successfully",
            &truncate(content, TRAY_BUDGET),
            "",
        );
        self.surfaces
            .send_to_popups(&SurfaceMessage::BroadcastNotification { notification })
            .await;
    }

    /// Diagnostics notification, bypassing the backend entirely
    pub async fn dispatch_test(&self) {
        let notification = NotificationRecord::new(
            NotificationKind::Test,
            "direct",
            "Test Notification",
            "This is a test notification",
            "Notification Test",
            "Test notification content",
            "",
        );
        self.surfaces
            .send_to_tabs(&SurfaceMessage::ShowInAppNotification {
                notification: notification.clone(),
                style_type: "success".to_string(),
            })
            .await;
        self.surfaces
            .send_to_popups(&SurfaceMessage::BroadcastNotification { notification })
            .await;
    }
}

/// Render record content for display: a JSON object carrying an address and
/// chain becomes `"<address> (<chain>)"`, any other JSON object its compact
/// serialization, everything else the raw text.
pub fn normalize_content(raw: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(serde_json::Value::Object(obj)) => {
            match (obj.get("address").and_then(|v| v.as_str()), obj.get("chain")) {
                (Some(address), Some(chain)) => {
                    let chain = chain.as_str().map(str::to_string).unwrap_or_else(|| chain.to_string());
                    format!("{} ({})", address, chain)
                }
                _ => serde_json::Value::Object(obj).to_string(),
            }
        }
        _ => raw.to_string(),
    }
}

/// Truncate to a display budget, appending an ellipsis marker when cut
pub fn truncate(s: &str, budget: usize) -> String {
    if s.chars().count() <= budget {
        s.to_string()
    } else {
        let cut: String = s.chars().take(budget).collect();
        format!("{}...", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_address_content() {
        let raw = r#"{"address":"0xabc","chain":"ethereum","timestamp":1}"#;
        assert_eq!(normalize_content(raw), "0xabc (ethereum)");
    }

    #[test]
    fn test_normalize_other_json() {
        let raw = r#"{"note":"hello"}"#;
        assert_eq!(normalize_content(raw), r#"{"note":"hello"}"#);
    }

    #[test]
    fn test_normalize_plain_text() {
        assert_eq!(normalize_content("just a string"), "just a string");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 100), "short");
        let long = "a".repeat(150);
        let cut = truncate(&long, 100);
        assert_eq!(cut.chars().count(), 103);
        assert!(cut.ends_with("..."));
    }
}
