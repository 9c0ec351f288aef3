/// Reconnection/recovery supervisor.
///
/// Owns the pipeline state (initialization phase, observed count, active
/// subscription), guards initialization against concurrent callers, and
/// guarantees through a recovery timer that the poll loop is eventually
/// running. Nothing here is fatal: every failure degrades to a later retry.
use crate::backend::BackendClient;
use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::error::{Result, ShareError};
use crate::poll::PollLoop;
use crate::store::{StateStore, KEY_GROUP_ID};
use crate::types::SubscriptionState;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, Instant};
use tracing::{debug, info, warn};

/// How often callers awaiting a foreign initialization re-check the phase
const INIT_WAIT_POLL: Duration = Duration::from_millis(200);

/// Backend initialization progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitPhase {
    NotStarted,
    InProgress,
    Completed,
}

/// Shared pipeline state, owned by the supervisor and handed to the poll
/// loop by reference. Mutated only from timer callbacks and message
/// handlers, so plain atomics and short-lived locks are enough.
pub struct PipelineState {
    init: RwLock<InitPhase>,
    init_attempts: AtomicU32,
    observed_count: AtomicU64,
    subscription: RwLock<SubscriptionState>,
}

impl PipelineState {
    pub fn new() -> Self {
        Self {
            init: RwLock::new(InitPhase::NotStarted),
            init_attempts: AtomicU32::new(0),
            observed_count: AtomicU64::new(0),
            subscription: RwLock::new(SubscriptionState::default()),
        }
    }

    pub fn observed_count(&self) -> u64 {
        self.observed_count.load(Ordering::SeqCst)
    }

    pub fn set_observed_count(&self, count: u64) {
        self.observed_count.store(count, Ordering::SeqCst);
    }

    pub async fn init_phase(&self) -> InitPhase {
        *self.init.read().await
    }

    pub fn init_attempts(&self) -> u32 {
        self.init_attempts.load(Ordering::SeqCst)
    }

    pub async fn subscription(&self) -> SubscriptionState {
        self.subscription.read().await.clone()
    }

    /// Reset the initialization flags ahead of a reconnect
    pub async fn reset_init(&self) {
        *self.init.write().await = InitPhase::NotStarted;
        self.init_attempts.store(0, Ordering::SeqCst);
    }
}

impl Default for PipelineState {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct Supervisor {
    state: Arc<PipelineState>,
    client: BackendClient,
    poll: PollLoop,
    store: StateStore,
    dispatcher: Dispatcher,
    init_timeout: Duration,
    max_init_retries: u32,
    init_retry_delay: Duration,
    recovery_interval: Duration,
    recovery_task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl Supervisor {
    pub fn new(
        config: &Config,
        state: Arc<PipelineState>,
        client: BackendClient,
        poll: PollLoop,
        store: StateStore,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            state,
            client,
            poll,
            store,
            dispatcher,
            init_timeout: config.init_timeout,
            max_init_retries: config.max_init_retries,
            init_retry_delay: config.init_retry_delay,
            recovery_interval: config.recovery_interval,
            recovery_task: Arc::new(Mutex::new(None)),
        }
    }

    pub fn state(&self) -> Arc<PipelineState> {
        self.state.clone()
    }

    pub fn poll(&self) -> &PollLoop {
        &self.poll
    }

    /// Make sure the backend connection is initialized. Concurrent callers
    /// never trigger a duplicate setup: whoever finds the phase NotStarted
    /// claims it, everyone else polls the shared phase until it resolves or
    /// the hard timeout elapses.
    pub async fn ensure_initialized(&self) -> Result<()> {
        loop {
            {
                let mut phase = self.state.init.write().await;
                match *phase {
                    InitPhase::Completed => return Ok(()),
                    InitPhase::NotStarted => {
                        *phase = InitPhase::InProgress;
                        break;
                    }
                    InitPhase::InProgress => {}
                }
            }

            // Another caller is initializing; await its outcome
            let deadline = Instant::now() + self.init_timeout;
            loop {
                sleep(INIT_WAIT_POLL).await;
                match self.state.init_phase().await {
                    InitPhase::Completed => return Ok(()),
                    InitPhase::NotStarted => {
                        let attempts = self.state.init_attempts();
                        if attempts >= self.max_init_retries {
                            return Err(ShareError::InitFailed { attempts });
                        }
                        // Initializer gave up early; try to claim it ourselves
                        break;
                    }
                    InitPhase::InProgress => {}
                }
                if Instant::now() >= deadline {
                    return Err(ShareError::InitTimeout);
                }
            }
        }

        self.run_initialization().await
    }

    async fn run_initialization(&self) -> Result<()> {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            self.state.init_attempts.store(attempts, Ordering::SeqCst);
            info!(
                "Initializing backend connection (attempt {}/{})",
                attempts, self.max_init_retries
            );
            match self.client.probe().await {
                Ok(()) => {
                    *self.state.init.write().await = InitPhase::Completed;
                    self.state.init_attempts.store(0, Ordering::SeqCst);
                    info!("Backend connection test successful");
                    return Ok(());
                }
                Err(e) => {
                    self.store.log_error(
                        "Init",
                        &format!("Backend connection test failed: {}", e),
                        None,
                    );
                    if attempts >= self.max_init_retries {
                        *self.state.init.write().await = InitPhase::NotStarted;
                        return Err(ShareError::InitFailed { attempts });
                    }
                    sleep(self.init_retry_delay).await;
                }
            }
        }
    }

    /// Full pipeline startup: initialize the backend, prune the shared
    /// scope and re-display the surviving notification, start monitoring,
    /// and rebuild the group subscription from persisted settings.
    ///
    /// Monitoring is started even when initialization failed: failing
    /// ticks feed the reconnect path instead of leaving the pipeline dead.
    pub async fn initialize_pipeline(&self) -> Result<()> {
        let init_result = self.ensure_initialized().await;

        if init_result.is_ok() {
            match self.store.prune_global_notifications() {
                Ok(Some(latest)) => {
                    debug!("Re-displaying notification {}", latest.id);
                    self.dispatcher.redisplay(&latest).await;
                }
                Ok(None) => {}
                Err(e) => self.store.log_error(
                    "Init",
                    &format!("Shared-scope prune failed: {}", e),
                    None,
                ),
            }
        }

        self.poll.start().await;

        if let Some(group_id) = self.store.group_id() {
            info!("Subscribing to group {} on startup", group_id);
            self.subscribe_group(&group_id).await;
        }

        init_result
    }

    /// Record the active group subscription
    pub async fn subscribe_group(&self, group_id: &str) {
        let mut sub = self.state.subscription.write().await;
        sub.group_id = Some(group_id.to_string());
        sub.channels = vec![format!("group-{}", group_id)];
        info!("Subscribed to group {}", group_id);
    }

    /// Tear the pipeline down and bring it back: reset initialization
    /// flags, stop and restart the poll loop, rebuild the subscription.
    pub async fn reconnect(&self) -> bool {
        info!("Attempting to reconnect to backend...");
        self.state.reset_init().await;
        self.poll.stop().await;

        match self.ensure_initialized().await {
            Ok(()) => {
                self.poll.start().await;
                let group = self.state.subscription.read().await.group_id.clone();
                if let Some(group_id) = group {
                    info!("Resubscribing to group {}", group_id);
                    self.subscribe_group(&group_id).await;
                }
                info!("Backend reconnection successful");
                true
            }
            Err(e) => {
                self.store
                    .log_error("Reconnect", &format!("Reconnection failed: {}", e), None);
                false
            }
        }
    }

    /// Arm the recovery timer. It checks every `recovery_interval` whether
    /// monitoring is running, reconnects when it is not, and cancels itself
    /// once recovery succeeds (or was never needed).
    pub async fn start_recovery_timer(&self) {
        let mut guard = self.recovery_task.lock().await;
        if let Some(handle) = guard.as_ref() {
            if !handle.is_finished() {
                return;
            }
        }
        info!("Starting recovery timer to ensure monitoring is active");

        let supervisor = self.clone();
        *guard = Some(tokio::spawn(async move {
            let mut ticker = interval(supervisor.recovery_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                debug!("Running recovery check...");
                if supervisor.poll.is_running().await {
                    debug!("Monitoring is active, recovery not needed");
                    break;
                }
                warn!("Monitoring is not active, attempting to restart it");
                if supervisor.reconnect().await {
                    info!("Recovered monitoring through reconnection");
                    break;
                }
            }
        }));
    }

    /// Consume reconnect requests raised by failing poll ticks. When a
    /// reconnect attempt fails, fall back to the recovery timer.
    pub fn spawn_reconnect_listener(&self, mut rx: mpsc::Receiver<()>) -> JoinHandle<()> {
        let supervisor = self.clone();
        tokio::spawn(async move {
            while rx.recv().await.is_some() {
                if !supervisor.reconnect().await {
                    supervisor.start_recovery_timer().await;
                }
            }
        })
    }

    /// Group setting changed: persist it, re-seed the observed count, and
    /// rebuild the subscription.
    pub async fn update_group(&self, group_id: &str) -> Result<()> {
        self.store.set_setting(KEY_GROUP_ID, group_id)?;
        if let Err(e) = self.poll.run_check(true).await {
            self.store.log_error(
                "GroupSubscription",
                &format!("Count re-seed failed: {}", e),
                None,
            );
        }
        self.subscribe_group(group_id).await;
        Ok(())
    }

    /// Forced clean restart of monitoring (control API)
    pub async fn restart_monitoring(&self) -> Result<()> {
        self.poll.stop().await;
        self.state.reset_init().await;
        self.ensure_initialized().await?;
        self.poll.start().await;
        Ok(())
    }

    /// Monitoring status snapshot: (active, last count, initialized)
    pub async fn monitoring_status(&self) -> (bool, u64, bool) {
        let active = self.poll.is_running().await;
        let initialized = self.state.init_phase().await == InitPhase::Completed;
        (active, self.state.observed_count(), initialized)
    }
}
