/// Registry of attached UI surfaces (tabs and popups).
///
/// Each surface owns the receiving half of an unbounded channel; delivery is
/// per-recipient best-effort, and a surface that went away is logged and
/// ignored, never an error.
use crate::types::SurfaceMessage;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceKind {
    Tab,
    Popup,
}

impl SurfaceKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "tab" => Some(SurfaceKind::Tab),
            "popup" => Some(SurfaceKind::Popup),
            _ => None,
        }
    }
}

struct Surface {
    kind: SurfaceKind,
    tx: UnboundedSender<SurfaceMessage>,
}

#[derive(Clone, Default)]
pub struct SurfaceRegistry {
    surfaces: Arc<RwLock<HashMap<u64, Surface>>>,
    next_id: Arc<AtomicU64>,
}

impl SurfaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a new surface; returns its id and the message stream
    pub async fn attach(&self, kind: SurfaceKind) -> (u64, UnboundedReceiver<SurfaceMessage>) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        self.surfaces.write().await.insert(id, Surface { kind, tx });
        debug!("Surface {} attached ({:?})", id, kind);
        (id, rx)
    }

    pub async fn detach(&self, id: u64) {
        if self.surfaces.write().await.remove(&id).is_some() {
            debug!("Surface {} detached", id);
        }
    }

    /// Send to every attached tab surface, best-effort
    pub async fn send_to_tabs(&self, msg: &SurfaceMessage) {
        self.send_to_kind(SurfaceKind::Tab, msg).await;
    }

    /// Broadcast to every attached popup surface, best-effort
    pub async fn send_to_popups(&self, msg: &SurfaceMessage) {
        self.send_to_kind(SurfaceKind::Popup, msg).await;
    }

    async fn send_to_kind(&self, kind: SurfaceKind, msg: &SurfaceMessage) {
        let surfaces = self.surfaces.read().await;
        for (id, surface) in surfaces.iter() {
            if surface.kind != kind {
                continue;
            }
            if surface.tx.send(msg.clone()).is_err() {
                // Receiver dropped without detaching; harmless
                debug!("Surface {} not ready for messages", id);
            }
        }
    }

    pub async fn counts(&self) -> (usize, usize) {
        let surfaces = self.surfaces.read().await;
        let tabs = surfaces.values().filter(|s| s.kind == SurfaceKind::Tab).count();
        (tabs, surfaces.len() - tabs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SurfaceMessage;

    #[tokio::test]
    async fn test_fan_out_by_kind() {
        let registry = SurfaceRegistry::new();
        let (_tab_id, mut tab_rx) = registry.attach(SurfaceKind::Tab).await;
        let (_popup_id, mut popup_rx) = registry.attach(SurfaceKind::Popup).await;

        registry.send_to_tabs(&SurfaceMessage::ClearDbNotifications).await;

        assert!(matches!(
            tab_rx.try_recv(),
            Ok(SurfaceMessage::ClearDbNotifications)
        ));
        assert!(popup_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_dead_surface_is_ignored() {
        let registry = SurfaceRegistry::new();
        let (id, rx) = registry.attach(SurfaceKind::Tab).await;
        drop(rx);

        // Must not error or panic
        registry.send_to_tabs(&SurfaceMessage::ClearDbNotifications).await;
        registry.detach(id).await;
        assert_eq!(registry.counts().await, (0, 0));
    }
}
