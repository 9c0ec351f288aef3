/// Clipboard watcher: polls the system clipboard, detects contract
/// addresses, and runs them through the share path.
use crate::backend::BackendClient;
use crate::detector::{detect_address, ChainAddress};
use crate::dispatch::Dispatcher;
use crate::store::StateStore;
use crate::types::{Activity, NewShare};
use crate::webhook;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info};

#[derive(Clone)]
pub struct ClipboardWatcher {
    store: StateStore,
    client: BackendClient,
    dispatcher: Dispatcher,
    tick_interval: Duration,
}

impl ClipboardWatcher {
    pub fn new(
        store: StateStore,
        client: BackendClient,
        dispatcher: Dispatcher,
        tick_interval: Duration,
    ) -> Self {
        Self {
            store,
            client,
            dispatcher,
            tick_interval,
        }
    }

    /// Run the watcher until the task is aborted
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                "Clipboard watcher started - checking every {} ms",
                self.tick_interval.as_millis()
            );
            let mut last_detected: Option<String> = None;
            let mut ticker = interval(self.tick_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if !self.store.clipboard_enabled() {
                    continue;
                }
                let text = match read_clipboard().await {
                    Some(text) => text,
                    None => continue,
                };
                if let Some(hit) = detect_address(&text) {
                    if last_detected.as_deref() != Some(hit.address.as_str()) {
                        last_detected = Some(hit.address.clone());
                        self.handle_detection(hit).await;
                    }
                }
            }
        })
    }

    /// A freshly detected address: record it locally, forward to the
    /// webhook when configured, insert into the record store, and surface
    /// success feedback.
    async fn handle_detection(&self, hit: ChainAddress) {
        let (user_name, group_id) = match (self.store.user_name(), self.store.group_id()) {
            (Some(u), Some(g)) => (u, g),
            _ => {
                debug!("User not logged in or no group selected, skipping share");
                return;
            }
        };
        info!("Detected {} address on clipboard", hit.chain);

        let activity = Activity {
            address: hit.address.clone(),
            chain: hit.chain.as_str().to_string(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            shared_by: user_name.clone(),
        };
        if let Err(e) = self.store.push_activity(&activity) {
            self.store
                .log_error("Clipboard", &format!("Activity persist failed: {}", e), None);
        }

        if let Some(url) = self.store.webhook_url() {
            let activity = activity.clone();
            tokio::spawn(async move {
                webhook::forward_activity(&url, &activity).await;
            });
        }

        let content = match serde_json::to_string(&activity) {
            Ok(content) => content,
            Err(e) => {
                self.store
                    .log_error("Clipboard", &format!("Activity encode failed: {}", e), None);
                return;
            }
        };
        let share = NewShare {
            content: content.clone(),
            group_id: group_id.clone(),
            sender: user_name,
            timestamp: chrono::Utc::now().to_rfc3339(),
            title: "Contract Address".to_string(),
            url: String::new(),
        };

        // Insert reports success even under backend errors, so the user
        // always gets their feedback.
        self.client.insert(&share).await;
        info!("Contract address shared with group {}", group_id);
        self.dispatcher.dispatch_success(&content, &group_id, "").await;
    }
}

/// Clipboard access is blocking; keep it off the runtime threads
async fn read_clipboard() -> Option<String> {
    let result = tokio::task::spawn_blocking(|| {
        arboard::Clipboard::new().and_then(|mut clipboard| clipboard.get_text())
    })
    .await;
    match result {
        Ok(Ok(text)) if !text.is_empty() => Some(text),
        Ok(Ok(_)) => None,
        Ok(Err(e)) => {
            debug!("Error reading clipboard: {}", e);
            None
        }
        Err(e) => {
            debug!("Clipboard task failed: {}", e);
            None
        }
    }
}
