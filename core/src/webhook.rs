/// One-way Discord webhook forwarding for locally detected addresses.
/// Fire-and-forget: there is no feedback loop, failures are only logged.
use crate::types::Activity;
use tracing::debug;

const EMBED_COLOR: u32 = 0x6366f1;

pub async fn forward_activity(webhook_url: &str, activity: &Activity) {
    let timestamp = chrono::DateTime::from_timestamp_millis(activity.timestamp)
        .unwrap_or_else(chrono::Utc::now)
        .to_rfc3339();
    let payload = serde_json::json!({
        "username": "ChainShare Bot",
        "embeds": [{
            "title": "New Contract Address Shared",
            "description": format!("`{}`", activity.address),
            "color": EMBED_COLOR,
            "fields": [
                { "name": "Chain", "value": activity.chain.to_uppercase(), "inline": true },
                { "name": "Shared by", "value": activity.shared_by, "inline": true }
            ],
            "timestamp": timestamp,
        }]
    });

    match reqwest::Client::new().post(webhook_url).json(&payload).send().await {
        Ok(resp) => debug!("Webhook delivered: {}", resp.status()),
        Err(e) => debug!("Error sending to webhook: {}", e),
    }
}
