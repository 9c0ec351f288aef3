/// Persisted state: settings, notifications, error log, recent activity.
///
/// Two sled databases model the two storage scopes: `local.db` is
/// process-local, `shared.db` is the shared/global scope capped by recency.
/// Writers re-serialize whole lists; concurrent writers from different
/// surfaces may lose an update but never corrupt the store.
use crate::error::{Result, ShareError};
use crate::types::{Activity, ErrorLogEntry, NotificationKind, NotificationRecord};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info};

pub const KEY_GROUP_ID: &str = "groupId";
pub const KEY_USER_NAME: &str = "userName";
pub const KEY_CLIPBOARD_ENABLED: &str = "clipboardEnabled";
pub const KEY_WEBHOOK_URL: &str = "discordWebhookUrl";
pub const KEY_NOTIFICATIONS: &str = "inAppNotifications";
pub const KEY_ERROR_LOGS: &str = "errorLogs";
pub const KEY_ACTIVITIES: &str = "recentActivities";

const NOTIFICATION_PREFIX: &str = "notification_";
const GLOBAL_NOTIFICATION_PREFIX: &str = "global_notification_";

const MAX_NOTIFICATIONS: usize = 20;
const MAX_ERROR_LOGS: usize = 20;
const MAX_ACTIVITIES: usize = 10;

const GLOBAL_RETENTION_MS: i64 = 24 * 60 * 60 * 1000;

#[derive(Clone)]
pub struct StateStore {
    local: Arc<sled::Db>,
    shared: Arc<sled::Db>,
}

impl StateStore {
    /// Open both scopes under the given data directory
    pub fn new(data_dir: &Path) -> Result<Self> {
        let local = sled::open(data_dir.join("local.db"))
            .map_err(|e| ShareError::Storage(format!("local scope DB: {}", e)))?;
        let shared = sled::open(data_dir.join("shared.db"))
            .map_err(|e| ShareError::Storage(format!("shared scope DB: {}", e)))?;
        info!("State store initialized at {:?}", data_dir);
        Ok(Self {
            local: Arc::new(local),
            shared: Arc::new(shared),
        })
    }

    // ── Settings ──

    pub fn get_setting(&self, key: &str) -> Option<String> {
        self.local
            .get(key.as_bytes())
            .ok()
            .flatten()
            .and_then(|v| String::from_utf8(v.to_vec()).ok())
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.local
            .insert(key.as_bytes(), value.as_bytes())
            .map_err(|e| ShareError::Storage(format!("set {}: {}", key, e)))?;
        Ok(())
    }

    pub fn group_id(&self) -> Option<String> {
        self.get_setting(KEY_GROUP_ID).filter(|s| !s.is_empty())
    }

    pub fn user_name(&self) -> Option<String> {
        self.get_setting(KEY_USER_NAME).filter(|s| !s.is_empty())
    }

    /// Clipboard watching defaults to on
    pub fn clipboard_enabled(&self) -> bool {
        self.get_setting(KEY_CLIPBOARD_ENABLED)
            .map(|v| v != "false")
            .unwrap_or(true)
    }

    pub fn webhook_url(&self) -> Option<String> {
        self.get_setting(KEY_WEBHOOK_URL).filter(|s| !s.is_empty())
    }

    // ── Bounded lists ──

    fn get_list<T: DeserializeOwned>(&self, db: &sled::Db, key: &str) -> Vec<T> {
        db.get(key.as_bytes())
            .ok()
            .flatten()
            .and_then(|v| serde_json::from_slice(&v).ok())
            .unwrap_or_default()
    }

    fn put_list<T: Serialize>(&self, db: &sled::Db, key: &str, list: &[T]) -> Result<()> {
        let val = serde_json::to_vec(list).map_err(ShareError::Serialization)?;
        db.insert(key.as_bytes(), val)
            .map_err(|e| ShareError::Storage(format!("put {}: {}", key, e)))?;
        Ok(())
    }

    pub fn notifications(&self) -> Vec<NotificationRecord> {
        self.get_list(&self.local, KEY_NOTIFICATIONS)
    }

    /// Persist a notification in the local scope: insert newest-first, cap
    /// the list, and key the record by id. Same-kind eviction is the
    /// dispatcher's job and happens before this write.
    pub fn push_local_notification(&self, n: &NotificationRecord) -> Result<()> {
        let mut list: Vec<NotificationRecord> = self.notifications();
        list.insert(0, n.clone());
        list.truncate(MAX_NOTIFICATIONS);
        self.put_list(&self.local, KEY_NOTIFICATIONS, &list)?;

        let key = format!("{}{}", NOTIFICATION_PREFIX, n.id);
        let val = serde_json::to_vec(n).map_err(ShareError::Serialization)?;
        self.local
            .insert(key.as_bytes(), val)
            .map_err(|e| ShareError::Storage(format!("notification key: {}", e)))?;
        Ok(())
    }

    /// Remove every stored notification of `kind` from the local scope
    pub fn clear_local_kind(&self, kind: NotificationKind) -> Result<()> {
        let mut list: Vec<NotificationRecord> = self.notifications();
        list.retain(|n| n.kind != kind);
        self.put_list(&self.local, KEY_NOTIFICATIONS, &list)?;

        let prefix = format!("{}{}", NOTIFICATION_PREFIX, kind.prefix());
        let keys: Vec<_> = self
            .local
            .scan_prefix(prefix.as_bytes())
            .filter_map(|e| e.ok().map(|(k, _)| k))
            .collect();
        for key in keys {
            self.local
                .remove(&key)
                .map_err(|e| ShareError::Storage(format!("remove notification: {}", e)))?;
        }
        Ok(())
    }

    /// Persist a notification in the shared/global scope, keyed by id
    pub fn put_global_notification(&self, n: &NotificationRecord) -> Result<()> {
        let key = format!("{}{}", GLOBAL_NOTIFICATION_PREFIX, n.id);
        let val = serde_json::to_vec(n).map_err(ShareError::Serialization)?;
        self.shared
            .insert(key.as_bytes(), val)
            .map_err(|e| ShareError::Storage(format!("global notification: {}", e)))?;
        Ok(())
    }

    pub fn clear_global_kind(&self, kind: NotificationKind) -> Result<()> {
        let prefix = format!("{}{}", GLOBAL_NOTIFICATION_PREFIX, kind.prefix());
        let keys: Vec<_> = self
            .shared
            .scan_prefix(prefix.as_bytes())
            .filter_map(|e| e.ok().map(|(k, _)| k))
            .collect();
        for key in keys {
            self.shared
                .remove(&key)
                .map_err(|e| ShareError::Storage(format!("remove global: {}", e)))?;
        }
        Ok(())
    }

    pub fn global_notifications(&self) -> Vec<NotificationRecord> {
        self.shared
            .scan_prefix(GLOBAL_NOTIFICATION_PREFIX.as_bytes())
            .filter_map(|e| e.ok())
            .filter_map(|(_, v)| serde_json::from_slice(&v).ok())
            .collect()
    }

    /// Drop shared-scope notifications older than 24 h, keep only the most
    /// recent backend-derived one, and return it for redisplay.
    pub fn prune_global_notifications(&self) -> Result<Option<NotificationRecord>> {
        let cutoff = chrono::Utc::now().timestamp_millis() - GLOBAL_RETENTION_MS;
        let mut kept: Vec<NotificationRecord> = Vec::new();
        let mut removed = 0usize;

        let entries: Vec<_> = self
            .shared
            .scan_prefix(GLOBAL_NOTIFICATION_PREFIX.as_bytes())
            .filter_map(|e| e.ok())
            .collect();
        for (key, val) in entries {
            match serde_json::from_slice::<NotificationRecord>(&val) {
                Ok(n) if n.timestamp_ms >= cutoff => kept.push(n),
                _ => {
                    self.shared
                        .remove(&key)
                        .map_err(|e| ShareError::Storage(format!("prune global: {}", e)))?;
                    removed += 1;
                }
            }
        }

        let mut shares: Vec<NotificationRecord> = kept
            .into_iter()
            .filter(|n| n.kind == NotificationKind::Share)
            .collect();
        shares.sort_by(|a, b| b.timestamp_ms.cmp(&a.timestamp_ms));
        let latest = shares.first().cloned();

        // Only the most recent backend-derived notification survives
        for old in shares.iter().skip(1) {
            let key = format!("{}{}", GLOBAL_NOTIFICATION_PREFIX, old.id);
            self.shared
                .remove(key.as_bytes())
                .map_err(|e| ShareError::Storage(format!("prune global: {}", e)))?;
            removed += 1;
        }

        if removed > 0 {
            debug!("Pruned {} shared-scope notifications", removed);
        }
        Ok(latest)
    }

    // ── Error log ──

    /// Append to the persisted error log, newest first, capped at 20.
    /// Never fails: a broken store must not take down an error path.
    pub fn log_error(&self, source: &str, message: &str, detail: Option<serde_json::Value>) {
        error!("[{}] {}", source, message);
        let entry = ErrorLogEntry {
            source: source.to_string(),
            message: message.to_string(),
            detail,
            timestamp: chrono::Utc::now().to_rfc3339(),
        };
        let mut list: Vec<ErrorLogEntry> = self.get_list(&self.local, KEY_ERROR_LOGS);
        list.insert(0, entry);
        list.truncate(MAX_ERROR_LOGS);
        if let Err(e) = self.put_list(&self.local, KEY_ERROR_LOGS, &list) {
            error!("Failed to persist error log: {}", e);
        }
    }

    pub fn error_logs(&self) -> Vec<ErrorLogEntry> {
        self.get_list(&self.local, KEY_ERROR_LOGS)
    }

    // ── Recent activity ──

    pub fn push_activity(&self, activity: &Activity) -> Result<()> {
        let mut list: Vec<Activity> = self.get_list(&self.local, KEY_ACTIVITIES);
        list.insert(0, activity.clone());
        list.truncate(MAX_ACTIVITIES);
        self.put_list(&self.local, KEY_ACTIVITIES, &list)
    }

    pub fn recent_activities(&self) -> Vec<Activity> {
        self.get_list(&self.local, KEY_ACTIVITIES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(kind: NotificationKind, suffix: &str) -> NotificationRecord {
        NotificationRecord::new(kind, suffix, "t", "m", "c", "content", "g1")
    }

    #[test]
    fn test_settings_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path()).unwrap();

        assert_eq!(store.group_id(), None);
        assert!(store.clipboard_enabled());

        store.set_setting(KEY_GROUP_ID, "42").unwrap();
        store.set_setting(KEY_CLIPBOARD_ENABLED, "false").unwrap();
        assert_eq!(store.group_id(), Some("42".to_string()));
        assert!(!store.clipboard_enabled());
    }

    #[test]
    fn test_clear_local_kind() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path()).unwrap();

        store
            .push_local_notification(&record(NotificationKind::Share, "1"))
            .unwrap();
        store
            .push_local_notification(&record(NotificationKind::Success, "2"))
            .unwrap();

        store.clear_local_kind(NotificationKind::Share).unwrap();

        let list = store.notifications();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].kind, NotificationKind::Success);
        // Per-id keys of the cleared kind are gone too
        let leftover = store
            .local
            .scan_prefix(format!("{}{}", NOTIFICATION_PREFIX, NotificationKind::Share.prefix()).as_bytes())
            .count();
        assert_eq!(leftover, 0);
    }

    #[test]
    fn test_notification_list_capped() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path()).unwrap();

        for i in 0..30 {
            store
                .push_local_notification(&record(NotificationKind::Success, &i.to_string()))
                .unwrap();
        }
        let list = store.notifications();
        assert_eq!(list.len(), 20);
        // Newest first
        assert!(list[0].id.contains("-29-"));
    }

    #[test]
    fn test_clear_global_kind() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path()).unwrap();

        store
            .put_global_notification(&record(NotificationKind::Share, "1"))
            .unwrap();
        store
            .put_global_notification(&record(NotificationKind::Share, "2"))
            .unwrap();
        assert_eq!(store.global_notifications().len(), 2);

        store.clear_global_kind(NotificationKind::Share).unwrap();
        assert!(store.global_notifications().is_empty());
    }

    #[test]
    fn test_prune_keeps_latest_share() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path()).unwrap();

        let mut old = record(NotificationKind::Share, "old");
        old.timestamp_ms -= 2 * GLOBAL_RETENTION_MS;
        old.id = format!("{}-old-{}", NotificationKind::Share.prefix(), old.timestamp_ms);
        let key = format!("{}{}", GLOBAL_NOTIFICATION_PREFIX, old.id);
        store
            .shared
            .insert(key.as_bytes(), serde_json::to_vec(&old).unwrap())
            .unwrap();

        let fresh = record(NotificationKind::Share, "fresh");
        let key = format!("{}{}", GLOBAL_NOTIFICATION_PREFIX, fresh.id);
        store
            .shared
            .insert(key.as_bytes(), serde_json::to_vec(&fresh).unwrap())
            .unwrap();

        let latest = store.prune_global_notifications().unwrap();
        assert_eq!(latest.map(|n| n.id), Some(fresh.id));
        assert_eq!(store.global_notifications().len(), 1);
    }

    #[test]
    fn test_error_log_capped() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path()).unwrap();

        for i in 0..25 {
            store.log_error("Test", &format!("error {}", i), None);
        }
        let logs = store.error_logs();
        assert_eq!(logs.len(), 20);
        // Newest first
        assert_eq!(logs[0].message, "error 24");
    }

    #[test]
    fn test_activities_capped() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path()).unwrap();

        for i in 0..15 {
            store
                .push_activity(&Activity {
                    address: format!("0x{}", i),
                    chain: "ethereum".to_string(),
                    timestamp: i,
                    shared_by: "alice".to_string(),
                })
                .unwrap();
        }
        let acts = store.recent_activities();
        assert_eq!(acts.len(), 10);
        assert_eq!(acts[0].timestamp, 14);
    }
}
