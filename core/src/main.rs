/// ChainShare daemon - main entry point
use chainshare_core::api::{start_api_server, ApiContext};
use chainshare_core::clipboard::ClipboardWatcher;
use chainshare_core::{
    BackendClient, Config, Dispatcher, PipelineState, PollLoop, StateStore, Supervisor,
    SurfaceRegistry, TrayNotifier,
};
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Parse configuration
    let args: Vec<String> = env::args().collect();
    let config = Config::from_args(&args)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;

    let data_dir = config.data_dir();
    std::fs::create_dir_all(&data_dir)?;

    let store = StateStore::new(&data_dir)
        .map_err(|e| anyhow::anyhow!("Storage error: {}", e))?;
    let surfaces = SurfaceRegistry::new();
    let tray = TrayNotifier::new();
    let client = BackendClient::new(&config, store.clone())
        .map_err(|e| anyhow::anyhow!("Client error: {}", e))?;
    let dispatcher = Dispatcher::new(store.clone(), surfaces.clone(), tray);

    let state = Arc::new(PipelineState::new());
    let (reconnect_tx, reconnect_rx) = mpsc::channel(4);
    let poll = PollLoop::new(
        state.clone(),
        client.clone(),
        dispatcher.clone(),
        store.clone(),
        reconnect_tx,
        config.poll_interval,
    );
    let supervisor = Supervisor::new(
        &config,
        state,
        client.clone(),
        poll.clone(),
        store.clone(),
        dispatcher.clone(),
    );
    supervisor.spawn_reconnect_listener(reconnect_rx);

    info!("Starting ChainShare daemon");
    info!("   Backend: {}", config.backend_url);
    info!("   Table: {}", config.table);

    // Control API for surfaces and tools
    let api_ctx = ApiContext {
        supervisor: supervisor.clone(),
        client: client.clone(),
        dispatcher: dispatcher.clone(),
        store: store.clone(),
        surfaces: surfaces.clone(),
        poll_interval_ms: config.poll_interval.as_millis() as u64,
    };
    let api_addr = config.api_addr;
    tokio::spawn(async move {
        if let Err(e) = start_api_server(api_ctx, api_addr).await {
            error!("Control API failed: {}", e);
        }
    });

    if config.clipboard_watcher {
        ClipboardWatcher::new(
            store.clone(),
            client.clone(),
            dispatcher.clone(),
            config.clipboard_interval,
        )
        .spawn();
    }

    // Bring the pipeline up: one immediate attempt, one delayed second
    // attempt, then hand recovery to the supervisor's timer.
    let startup = supervisor.clone();
    tokio::spawn(async move {
        if let Err(e) = startup.initialize_pipeline().await {
            error!("Failed to initialize pipeline on startup: {}", e);
            sleep(Duration::from_secs(5)).await;
            if let Err(e) = startup.initialize_pipeline().await {
                error!("Second attempt to initialize pipeline failed: {}", e);
                startup.start_recovery_timer().await;
            }
        }
    });

    wait_for_shutdown().await;
    info!("Shutdown signal received, stopping pipeline...");
    supervisor.poll().stop().await;
    info!("Daemon stopped");

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn wait_for_shutdown() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
        info!("Ctrl+C received");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
        info!("SIGTERM received");
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
