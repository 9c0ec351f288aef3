/// Timer-driven poll loop: diffs the backend record count against the last
/// observed value and hands newly arrived records to the dispatcher.
use crate::backend::BackendClient;
use crate::dispatch::Dispatcher;
use crate::error::Result;
use crate::store::StateStore;
use crate::supervisor::PipelineState;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info, warn};

/// Substrings that mark a tick failure as a connectivity problem
const CONNECTIVITY_MARKERS: [&str; 3] = ["database", "network", "connect"];

#[derive(Clone)]
pub struct PollLoop {
    state: Arc<PipelineState>,
    client: BackendClient,
    dispatcher: Dispatcher,
    store: StateStore,
    reconnect_tx: mpsc::Sender<()>,
    tick_interval: Duration,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl PollLoop {
    pub fn new(
        state: Arc<PipelineState>,
        client: BackendClient,
        dispatcher: Dispatcher,
        store: StateStore,
        reconnect_tx: mpsc::Sender<()>,
        tick_interval: Duration,
    ) -> Self {
        Self {
            state,
            client,
            dispatcher,
            store,
            reconnect_tx,
            tick_interval,
            task: Arc::new(Mutex::new(None)),
        }
    }

    /// Start monitoring. Idempotent: a running timer is cancelled first so
    /// there is never more than one active ticker.
    pub async fn start(&self) {
        let mut task = self.task.lock().await;
        if let Some(handle) = task.take() {
            handle.abort();
        }
        info!(
            "Starting record monitoring - checking every {} ms",
            self.tick_interval.as_millis()
        );

        // Initial check only seeds the observed count, never dispatches
        if let Err(e) = self.run_check(true).await {
            self.store.log_error(
                "Monitoring",
                &format!("Initial store check failed: {}", e),
                None,
            );
        }

        let poll = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = interval(poll.tick_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick of a tokio interval completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                // Each check runs independently of the ticker: stopping the
                // loop only prevents future ticks, and a slow check must not
                // hold back the next one.
                let poll = poll.clone();
                tokio::spawn(async move {
                    if let Err(e) = poll.run_check(false).await {
                        warn!("Periodic store check failed: {}", e);
                        poll.store.log_error(
                            "Monitoring",
                            &format!("Periodic store check failed: {}", e),
                            None,
                        );
                        if is_connectivity_error(&e.to_string()) {
                            info!("Connectivity problem detected, requesting reconnect");
                            let _ = poll.reconnect_tx.try_send(());
                        }
                    }
                });
            }
        });
        *task = Some(handle);
    }

    /// Cancel the timer. Safe when already stopped; an in-flight tick runs
    /// to completion and its effects still apply.
    pub async fn stop(&self) {
        let mut task = self.task.lock().await;
        if let Some(handle) = task.take() {
            handle.abort();
            info!("Record monitoring stopped");
        }
    }

    pub async fn is_running(&self) -> bool {
        self.task
            .lock()
            .await
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// One monitoring pass: read the count, fetch-and-dispatch on growth,
    /// then record the new count within this same pass.
    pub async fn run_check(&self, is_initial: bool) -> Result<()> {
        let current = self.client.get_count().await?;
        let previous = self.state.observed_count();
        debug!(
            "Current store entries: {}, previous: {}",
            current, previous
        );

        if !is_initial && current > previous {
            let delta = current - previous;
            info!("Found {} new records", delta);
            if let Err(e) = self.fetch_and_notify(delta).await {
                self.store.log_error(
                    "Monitoring",
                    &format!("Failed to process new records: {}", e),
                    None,
                );
            }
        }

        self.state.set_observed_count(current);
        Ok(())
    }

    async fn fetch_and_notify(&self, delta: u64) -> Result<()> {
        let records = self.client.get_latest(delta).await?;
        if records.is_empty() {
            debug!("No new records found");
            return Ok(());
        }
        // Only the newest of the batch is dispatched, by design
        if let Some(newest) = records.into_iter().max_by_key(|r| r.id) {
            self.dispatcher.dispatch_record(&newest).await;
        }
        Ok(())
    }
}

/// A tick failure whose message hints at a connectivity problem should
/// trigger the supervisor's reconnect path.
pub fn is_connectivity_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    CONNECTIVITY_MARKERS.iter().any(|m| lower.contains(m))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connectivity_markers() {
        assert!(is_connectivity_error("network error: connection refused"));
        assert!(is_connectivity_error("Database query error"));
        assert!(is_connectivity_error("failed to connect to host"));
        assert!(!is_connectivity_error("http error 422: bad payload"));
    }
}
