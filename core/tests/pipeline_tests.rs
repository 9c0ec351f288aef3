/// Pipeline integration tests
/// Exercise the polling/notification pipeline against a stub record store.

use chainshare_core::store::KEY_GROUP_ID;
use chainshare_core::types::{NewShare, NotificationKind, SharedRecord, SurfaceMessage};
use chainshare_core::{
    BackendClient, Config, Dispatcher, PipelineState, PollLoop, ShareError, StateStore,
    Supervisor, SurfaceKind, SurfaceRegistry, TrayNotifier,
};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex};
use tokio::time::sleep;

// ─── Stub record store ───────────────────────────────────────────────────────

#[derive(Clone)]
struct StubBackend {
    addr: std::net::SocketAddr,
    base_count: Arc<AtomicU64>,
    records: Arc<Mutex<Vec<serde_json::Value>>>,
    fail_inserts: Arc<AtomicBool>,
    omit_count_header: Arc<AtomicBool>,
    requests: Arc<Mutex<Vec<String>>>,
}

impl StubBackend {
    async fn spawn() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let stub = Self {
            addr,
            base_count: Arc::new(AtomicU64::new(0)),
            records: Arc::new(Mutex::new(Vec::new())),
            fail_inserts: Arc::new(AtomicBool::new(false)),
            omit_count_header: Arc::new(AtomicBool::new(false)),
            requests: Arc::new(Mutex::new(Vec::new())),
        };

        let server = stub.clone();
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, _)) => {
                        let server = server.clone();
                        tokio::spawn(async move {
                            let _ = server.handle_connection(stream).await;
                        });
                    }
                    Err(_) => break,
                }
            }
        });
        stub
    }

    fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    async fn total(&self) -> u64 {
        self.base_count.load(Ordering::SeqCst) + self.records.lock().await.len() as u64
    }

    async fn push_record(&self, id: i64, group_id: &str, content: &str) {
        self.records.lock().await.push(serde_json::json!({
            "id": id,
            "group_id": group_id,
            "sender": "bob",
            "content": content,
            "title": "Contract Address",
            "url": "",
            "timestamp": "2026-01-01T00:00:00Z",
        }));
    }

    async fn requests_matching(&self, needle: &str) -> usize {
        self.requests
            .lock()
            .await
            .iter()
            .filter(|r| r.contains(needle))
            .count()
    }

    async fn handle_connection(&self, mut stream: tokio::net::TcpStream) -> std::io::Result<()> {
        // Read until end of headers
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        let header_end = loop {
            let n = stream.read(&mut chunk).await?;
            if n == 0 {
                return Ok(());
            }
            buf.extend_from_slice(&chunk[..n]);
            if let Some(pos) = find_header_end(&buf) {
                break pos;
            }
        };

        let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
        let request_line = head.lines().next().unwrap_or_default().to_string();
        let mut parts = request_line.split_whitespace();
        let method = parts.next().unwrap_or_default().to_string();
        let path = parts.next().unwrap_or_default().to_string();
        self.requests.lock().await.push(format!("{} {}", method, path));

        // Drain the body if any
        let content_length: usize = head
            .lines()
            .find(|l| l.to_lowercase().starts_with("content-length:"))
            .and_then(|l| l.split(':').nth(1))
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0);
        let mut body = buf[header_end + 4..].to_vec();
        while body.len() < content_length {
            let n = stream.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            body.extend_from_slice(&chunk[..n]);
        }

        let response = self.route(&method, &path).await;
        stream.write_all(response.as_bytes()).await?;
        stream.shutdown().await.ok();
        Ok(())
    }

    async fn route(&self, method: &str, path: &str) -> String {
        if method == "POST" {
            if self.fail_inserts.load(Ordering::SeqCst) {
                return http_response(500, &[], r#"{"message":"insert rejected"}"#);
            }
            return http_response(201, &[], "");
        }

        if path.contains("/auth/v1/health") {
            return http_response(200, &[], "{}");
        }

        if path.contains("select=count") {
            let total = self.total().await;
            if self.omit_count_header.load(Ordering::SeqCst) {
                return http_response(200, &[], "[]");
            }
            let range = format!("Content-Range: 0-{}/{}", total.saturating_sub(1), total);
            return http_response(200, &[&range], "[]");
        }

        if path.contains("order=id.desc") {
            let limit: usize = path
                .split("limit=")
                .nth(1)
                .and_then(|v| v.parse().ok())
                .unwrap_or(1);
            let mut records = self.records.lock().await.clone();
            records.sort_by_key(|r| std::cmp::Reverse(r["id"].as_i64().unwrap_or(0)));
            records.truncate(limit);
            let body = serde_json::to_string(&records).unwrap();
            return http_response(200, &[], &body);
        }

        http_response(404, &[], r#"{"message":"not found"}"#)
    }
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

fn http_response(status: u16, extra_headers: &[&str], body: &str) -> String {
    let reason = match status {
        200 => "OK",
        201 => "Created",
        404 => "Not Found",
        _ => "Internal Server Error",
    };
    let mut resp = format!("HTTP/1.1 {} {}\r\n", status, reason);
    resp.push_str("Content-Type: application/json\r\n");
    for h in extra_headers {
        resp.push_str(h);
        resp.push_str("\r\n");
    }
    resp.push_str(&format!("Content-Length: {}\r\n", body.len()));
    resp.push_str("Connection: close\r\n\r\n");
    resp.push_str(body);
    resp
}

// ─── Pipeline wiring ─────────────────────────────────────────────────────────

struct TestPipeline {
    _dir: TempDir,
    store: StateStore,
    surfaces: SurfaceRegistry,
    client: BackendClient,
    dispatcher: Dispatcher,
    poll: PollLoop,
    supervisor: Supervisor,
    state: Arc<PipelineState>,
}

async fn build_pipeline(stub: &StubBackend, poll_interval: Duration) -> TestPipeline {
    let config = Config {
        backend_url: stub.url(),
        api_key: "test-key".to_string(),
        poll_interval,
        init_retry_delay: Duration::from_millis(50),
        request_timeout: Duration::from_secs(2),
        ..Default::default()
    };

    let dir = TempDir::new().unwrap();
    let store = StateStore::new(dir.path()).unwrap();
    let surfaces = SurfaceRegistry::new();
    let client = BackendClient::new(&config, store.clone()).unwrap();
    let dispatcher = Dispatcher::new(store.clone(), surfaces.clone(), TrayNotifier::disabled());

    let state = Arc::new(PipelineState::new());
    let (reconnect_tx, _reconnect_rx) = mpsc::channel(4);
    let poll = PollLoop::new(
        state.clone(),
        client.clone(),
        dispatcher.clone(),
        store.clone(),
        reconnect_tx,
        poll_interval,
    );
    let supervisor = Supervisor::new(
        &config,
        state.clone(),
        client.clone(),
        poll.clone(),
        store.clone(),
        dispatcher.clone(),
    );

    TestPipeline {
        _dir: dir,
        store,
        surfaces,
        client,
        dispatcher,
        poll,
        supervisor,
        state,
    }
}

fn sample_share() -> NewShare {
    NewShare {
        content: r#"{"address":"0xdeadbeef","chain":"ethereum"}"#.to_string(),
        group_id: "7".to_string(),
        sender: "alice".to_string(),
        timestamp: "2026-01-01T00:00:00Z".to_string(),
        title: "Contract Address".to_string(),
        url: String::new(),
    }
}

// ─── Backend client ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_get_count_stable_between_calls() {
    let stub = StubBackend::spawn().await;
    stub.base_count.store(5, Ordering::SeqCst);
    let pipeline = build_pipeline(&stub, Duration::from_secs(3)).await;

    let first = pipeline.client.get_count().await.unwrap();
    let second = pipeline.client.get_count().await.unwrap();
    assert_eq!(first, 5);
    assert_eq!(second, 5);
}

#[tokio::test]
async fn test_get_count_missing_header() {
    let stub = StubBackend::spawn().await;
    stub.omit_count_header.store(true, Ordering::SeqCst);
    let pipeline = build_pipeline(&stub, Duration::from_secs(3)).await;

    let err = pipeline.client.get_count().await.unwrap_err();
    assert!(matches!(err, ShareError::CountUnavailable));
}

#[tokio::test]
async fn test_get_latest_orders_newest_first() {
    let stub = StubBackend::spawn().await;
    stub.push_record(1, "7", "first").await;
    stub.push_record(3, "7", "third").await;
    stub.push_record(2, "7", "second").await;
    let pipeline = build_pipeline(&stub, Duration::from_secs(3)).await;

    let records: Vec<SharedRecord> = pipeline.client.get_latest(2).await.unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].id, 3);
    assert_eq!(records[1].id, 2);
}

#[tokio::test]
async fn test_insert_all_strategies_fail_still_succeeds() {
    let stub = StubBackend::spawn().await;
    stub.fail_inserts.store(true, Ordering::SeqCst);
    let pipeline = build_pipeline(&stub, Duration::from_secs(3)).await;

    let inserted = pipeline.client.insert(&sample_share()).await;
    assert!(inserted, "insert must report success once the legacy transport is reached");

    // All four transports actually went over the wire
    assert_eq!(stub.requests_matching("POST").await, 4);
    // And the failures are visible in the error log
    assert!(!pipeline.store.error_logs().is_empty());
}

#[tokio::test]
async fn test_insert_first_strategy_wins() {
    let stub = StubBackend::spawn().await;
    let pipeline = build_pipeline(&stub, Duration::from_secs(3)).await;

    let inserted = pipeline.client.insert(&sample_share()).await;
    assert!(inserted);
    assert_eq!(stub.requests_matching("POST").await, 1);
}

#[tokio::test]
async fn test_health_check() {
    let stub = StubBackend::spawn().await;
    let pipeline = build_pipeline(&stub, Duration::from_secs(3)).await;

    pipeline.client.health_check().await.unwrap();
    assert_eq!(stub.requests_matching("/auth/v1/health").await, 1);
}

// ─── Poll loop ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_initial_check_seeds_count_without_dispatch() {
    let stub = StubBackend::spawn().await;
    stub.base_count.store(42, Ordering::SeqCst);
    let pipeline = build_pipeline(&stub, Duration::from_secs(3)).await;
    let (_id, mut tab_rx) = pipeline.surfaces.attach(SurfaceKind::Tab).await;

    pipeline.poll.run_check(true).await.unwrap();

    assert_eq!(pipeline.state.observed_count(), 42);
    assert!(tab_rx.try_recv().is_err(), "initial check must not dispatch");
    assert!(pipeline.store.notifications().is_empty());
}

#[tokio::test]
async fn test_growth_dispatches_only_newest() {
    let stub = StubBackend::spawn().await;
    stub.base_count.store(10, Ordering::SeqCst);
    let pipeline = build_pipeline(&stub, Duration::from_secs(3)).await;
    let (_id, mut tab_rx) = pipeline.surfaces.attach(SurfaceKind::Tab).await;

    pipeline.poll.run_check(true).await.unwrap();
    assert_eq!(pipeline.state.observed_count(), 10);

    // Three records arrive between ticks: count goes 10 -> 13
    stub.push_record(11, "7", r#"{"address":"0xaaa","chain":"ethereum"}"#).await;
    stub.push_record(12, "7", r#"{"address":"0xbbb","chain":"ethereum"}"#).await;
    stub.push_record(13, "7", r#"{"address":"0xccc","chain":"ethereum"}"#).await;

    pipeline.poll.run_check(false).await.unwrap();
    assert_eq!(pipeline.state.observed_count(), 13);

    // The batch was fetched with the exact delta
    assert_eq!(stub.requests_matching("limit=3").await, 1);

    // Tabs got exactly one clear + one show, for the record with the
    // highest identifier
    let mut shows = Vec::new();
    let mut clears = 0;
    while let Ok(msg) = tab_rx.try_recv() {
        match msg {
            SurfaceMessage::ShowInAppNotification { notification, .. } => shows.push(notification),
            SurfaceMessage::ClearDbNotifications => clears += 1,
            other => panic!("unexpected envelope: {:?}", other),
        }
    }
    assert_eq!(clears, 1);
    assert_eq!(shows.len(), 1, "only the newest of the batch is dispatched");
    assert_eq!(shows[0].content, "0xccc (ethereum)");
    assert!(shows[0].id.starts_with("share-notification-13-"));

    // And exactly one notification was persisted
    let stored = pipeline.store.notifications();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].kind, NotificationKind::Share);
}

#[tokio::test]
async fn test_no_dispatch_without_growth() {
    let stub = StubBackend::spawn().await;
    stub.base_count.store(10, Ordering::SeqCst);
    let pipeline = build_pipeline(&stub, Duration::from_secs(3)).await;
    let (_id, mut tab_rx) = pipeline.surfaces.attach(SurfaceKind::Tab).await;

    pipeline.poll.run_check(true).await.unwrap();
    pipeline.poll.run_check(false).await.unwrap();
    pipeline.poll.run_check(false).await.unwrap();

    assert!(tab_rx.try_recv().is_err());
}

#[tokio::test]
async fn test_stop_then_start_single_timer() {
    let stub = StubBackend::spawn().await;
    stub.base_count.store(1, Ordering::SeqCst);
    let pipeline = build_pipeline(&stub, Duration::from_millis(100)).await;

    // Restarting without stopping must not leave a second ticker behind
    pipeline.poll.start().await;
    pipeline.poll.start().await;
    assert!(pipeline.poll.is_running().await);

    sleep(Duration::from_millis(600)).await;
    let during = stub.requests_matching("select=count").await;
    // Two initial checks plus one ticker's worth of periodic checks; a
    // duplicate ticker would roughly double this
    assert!(during <= 10, "saw {} count reads, duplicate ticker suspected", during);
    assert!(during >= 3);

    pipeline.poll.stop().await;
    assert!(!pipeline.poll.is_running().await);
    // Let any in-flight check finish; it may still land (by design), but no
    // new ticks may fire afterwards
    sleep(Duration::from_millis(150)).await;
    let after_stop = stub.requests_matching("select=count").await;
    sleep(Duration::from_millis(350)).await;
    assert_eq!(
        stub.requests_matching("select=count").await,
        after_stop,
        "stopped loop must not keep polling"
    );

    // stop is safe when already stopped
    pipeline.poll.stop().await;
}

// ─── Dispatcher ──────────────────────────────────────────────────────────────

fn record(id: i64, group_id: &str, content: &str) -> SharedRecord {
    SharedRecord {
        id,
        group_id: group_id.to_string(),
        sender: "bob".to_string(),
        content: content.to_string(),
        title: None,
        url: None,
        timestamp: None,
    }
}

#[tokio::test]
async fn test_same_kind_notification_supersedes() {
    let stub = StubBackend::spawn().await;
    let pipeline = build_pipeline(&stub, Duration::from_secs(3)).await;
    let (_id, mut tab_rx) = pipeline.surfaces.attach(SurfaceKind::Tab).await;

    assert!(pipeline.dispatcher.dispatch_record(&record(1, "7", "one")).await);
    assert!(pipeline.dispatcher.dispatch_record(&record(2, "7", "two")).await);

    // Exactly one backend-derived notification survives in the local scope
    let stored = pipeline.store.notifications();
    assert_eq!(stored.len(), 1);
    assert!(stored[0].id.starts_with("share-notification-2-"));

    // And in the shared scope
    let globals = pipeline.store.global_notifications();
    assert_eq!(globals.len(), 1);
    assert!(globals[0].id.starts_with("share-notification-2-"));

    // Tabs were told to clear before each render
    let mut sequence = Vec::new();
    while let Ok(msg) = tab_rx.try_recv() {
        sequence.push(match msg {
            SurfaceMessage::ClearDbNotifications => "clear",
            SurfaceMessage::ShowInAppNotification { .. } => "show",
            _ => "other",
        });
    }
    assert_eq!(sequence, vec!["clear", "show", "clear", "show"]);
}

#[tokio::test]
async fn test_group_mismatch_dropped() {
    let stub = StubBackend::spawn().await;
    let pipeline = build_pipeline(&stub, Duration::from_secs(3)).await;
    pipeline.store.set_setting(KEY_GROUP_ID, "H").unwrap();
    let (_id, mut tab_rx) = pipeline.surfaces.attach(SurfaceKind::Tab).await;
    let (_pid, mut popup_rx) = pipeline.surfaces.attach(SurfaceKind::Popup).await;

    let dispatched = pipeline.dispatcher.dispatch_record(&record(5, "G", "x")).await;

    assert!(!dispatched);
    assert!(pipeline.store.notifications().is_empty());
    assert!(pipeline.store.global_notifications().is_empty());
    assert!(tab_rx.try_recv().is_err());
    assert!(popup_rx.try_recv().is_err());
}

#[tokio::test]
async fn test_matching_group_dispatches() {
    let stub = StubBackend::spawn().await;
    let pipeline = build_pipeline(&stub, Duration::from_secs(3)).await;
    pipeline.store.set_setting(KEY_GROUP_ID, "G").unwrap();
    let (_pid, mut popup_rx) = pipeline.surfaces.attach(SurfaceKind::Popup).await;

    assert!(pipeline.dispatcher.dispatch_record(&record(5, "G", "x")).await);
    assert!(matches!(
        popup_rx.try_recv(),
        Ok(SurfaceMessage::BroadcastNotification { .. })
    ));
}

// ─── Supervisor ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_concurrent_initialization_single_setup() {
    let stub = StubBackend::spawn().await;
    let pipeline = build_pipeline(&stub, Duration::from_secs(3)).await;
    let supervisor = pipeline.supervisor.clone();

    let a = {
        let s = supervisor.clone();
        tokio::spawn(async move { s.ensure_initialized().await })
    };
    let b = {
        let s = supervisor.clone();
        tokio::spawn(async move { s.ensure_initialized().await })
    };

    a.await.unwrap().unwrap();
    b.await.unwrap().unwrap();

    // Exactly one underlying connection probe ran
    assert_eq!(stub.requests_matching("limit=1").await, 1);
}

#[tokio::test]
async fn test_initialization_already_completed_is_cheap() {
    let stub = StubBackend::spawn().await;
    let pipeline = build_pipeline(&stub, Duration::from_secs(3)).await;

    pipeline.supervisor.ensure_initialized().await.unwrap();
    pipeline.supervisor.ensure_initialized().await.unwrap();
    assert_eq!(stub.requests_matching("limit=1").await, 1);
}

#[tokio::test]
async fn test_reconnect_restarts_monitoring() {
    let stub = StubBackend::spawn().await;
    stub.base_count.store(3, Ordering::SeqCst);
    let pipeline = build_pipeline(&stub, Duration::from_millis(200)).await;

    pipeline.supervisor.initialize_pipeline().await.unwrap();
    assert!(pipeline.poll.is_running().await);

    assert!(pipeline.supervisor.reconnect().await);
    assert!(pipeline.poll.is_running().await);
    assert_eq!(pipeline.state.observed_count(), 3);

    pipeline.poll.stop().await;
}

// ─── Control API ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_control_api_status_and_subscribe() {
    use chainshare_core::api::{start_api_server, ApiContext};
    use tokio::io::{AsyncBufReadExt, BufReader};

    let stub = StubBackend::spawn().await;
    stub.base_count.store(2, Ordering::SeqCst);
    let pipeline = build_pipeline(&stub, Duration::from_secs(3)).await;

    let ctx = ApiContext {
        supervisor: pipeline.supervisor.clone(),
        client: pipeline.client.clone(),
        dispatcher: pipeline.dispatcher.clone(),
        store: pipeline.store.clone(),
        surfaces: pipeline.surfaces.clone(),
        poll_interval_ms: 3000,
    };
    let api_addr: std::net::SocketAddr = "127.0.0.1:17425".parse().unwrap();
    tokio::spawn(async move {
        let _ = start_api_server(ctx, api_addr).await;
    });
    sleep(Duration::from_millis(100)).await;

    // Command mode: status
    let mut stream = tokio::net::TcpStream::connect(api_addr).await.unwrap();
    stream
        .write_all(b"{\"command\":\"status\"}\n")
        .await
        .unwrap();
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    reader.read_line(&mut line).await.unwrap();
    let resp: serde_json::Value = serde_json::from_str(&line).unwrap();
    assert_eq!(resp["success"], true);
    assert_eq!(resp["data"]["active"], false);

    // Push mode: subscribe as a tab surface, then trigger a test dispatch
    let mut sub = tokio::net::TcpStream::connect(api_addr).await.unwrap();
    sub.write_all(b"{\"command\":\"subscribe\",\"surface\":\"tab\"}\n")
        .await
        .unwrap();
    let mut sub_reader = BufReader::new(sub);
    let mut ack = String::new();
    sub_reader.read_line(&mut ack).await.unwrap();
    let ack: serde_json::Value = serde_json::from_str(&ack).unwrap();
    assert_eq!(ack["success"], true);

    pipeline.dispatcher.dispatch_test().await;

    let mut envelope = String::new();
    sub_reader.read_line(&mut envelope).await.unwrap();
    let envelope: serde_json::Value = serde_json::from_str(&envelope).unwrap();
    assert_eq!(envelope["action"], "showInAppNotification");
    assert_eq!(envelope["styleType"], "success");
}

#[tokio::test]
async fn test_subscription_rebuilt_on_group_change() {
    let stub = StubBackend::spawn().await;
    stub.base_count.store(9, Ordering::SeqCst);
    let pipeline = build_pipeline(&stub, Duration::from_secs(3)).await;

    pipeline.supervisor.update_group("42").await.unwrap();

    let sub = pipeline.state.subscription().await;
    assert_eq!(sub.group_id.as_deref(), Some("42"));
    assert_eq!(sub.channels, vec!["group-42".to_string()]);
    assert_eq!(pipeline.store.group_id().as_deref(), Some("42"));
    // Group change re-seeds the observed count without dispatching
    assert_eq!(pipeline.state.observed_count(), 9);
}
