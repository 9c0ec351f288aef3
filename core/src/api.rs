/// Control/event API for local surfaces and tools.
///
/// Newline-delimited JSON over TCP. Commands get a `{success, data?, error?}`
/// reply; a `subscribe` command attaches the connection as a surface (tab or
/// popup), after which notification envelopes are pushed as JSON lines.
use crate::backend::BackendClient;
use crate::detector::Chain;
use crate::dispatch::Dispatcher;
use crate::error::{Result, ShareError};
use crate::store::StateStore;
use crate::supervisor::Supervisor;
use crate::surfaces::{SurfaceKind, SurfaceRegistry};
use crate::types::NewShare;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info};

/// API request
#[derive(Debug, Deserialize)]
#[serde(tag = "command", rename_all = "camelCase")]
enum ApiRequest {
    Ping,
    Status,
    Share {
        content: String,
        group_id: Option<String>,
        sender: Option<String>,
        title: Option<String>,
        url: Option<String>,
    },
    Reconnect,
    RestartMonitoring,
    TestNotification,
    TestConnection,
    SetGroup {
        group_id: String,
    },
    Notifications,
    Errors,
    Activities,
    Subscribe {
        surface: String,
    },
}

/// API response
#[derive(Debug, Serialize)]
struct ApiResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warning: Option<String>,
}

impl ApiResponse {
    fn success(data: serde_json::Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            warning: None,
        }
    }

    fn success_with_warning(data: serde_json::Value, warning: String) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            warning: Some(warning),
        }
    }

    fn error(msg: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg),
            warning: None,
        }
    }
}

#[derive(Clone)]
pub struct ApiContext {
    pub supervisor: Supervisor,
    pub client: BackendClient,
    pub dispatcher: Dispatcher,
    pub store: StateStore,
    pub surfaces: SurfaceRegistry,
    pub poll_interval_ms: u64,
}

/// Start the control API server
pub async fn start_api_server(ctx: ApiContext, api_addr: SocketAddr) -> Result<()> {
    let listener = TcpListener::bind(&api_addr).await.map_err(ShareError::Io)?;
    info!("Control API listening on {}", api_addr);

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                debug!("API client connected from {}", addr);
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_api_client(stream, ctx).await {
                        error!("Error handling API client: {}", e);
                    }
                });
            }
            Err(e) => {
                error!("Failed to accept API connection: {}", e);
            }
        }
    }
}

/// Handle one API connection. Command mode until `subscribe`, push mode
/// afterwards.
async fn handle_api_client(mut stream: TcpStream, ctx: ApiContext) -> Result<()> {
    let (reader, mut writer) = stream.split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("API client disconnected");
                return Ok(());
            }
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }

                // Subscription switches this connection into push mode
                if let Ok(ApiRequest::Subscribe { surface }) =
                    serde_json::from_str::<ApiRequest>(trimmed)
                {
                    let kind = match SurfaceKind::parse(&surface) {
                        Some(kind) => kind,
                        None => {
                            let resp = ApiResponse::error(format!(
                                "Unknown surface kind: {}",
                                surface
                            ));
                            write_json(&mut writer, &resp).await?;
                            continue;
                        }
                    };
                    let (id, mut rx) = ctx.surfaces.attach(kind).await;
                    let resp =
                        ApiResponse::success(serde_json::json!({ "surface_id": id }));
                    write_json(&mut writer, &resp).await?;

                    loop {
                        tokio::select! {
                            msg = rx.recv() => {
                                match msg {
                                    Some(envelope) => {
                                        if write_json(&mut writer, &envelope).await.is_err() {
                                            break;
                                        }
                                    }
                                    None => break,
                                }
                            }
                            read = reader.read_line(&mut line) => {
                                // Surfaces only acknowledge; EOF means gone
                                match read {
                                    Ok(0) | Err(_) => break,
                                    Ok(_) => line.clear(),
                                }
                            }
                        }
                    }
                    ctx.surfaces.detach(id).await;
                    debug!("Surface {} connection closed", id);
                    return Ok(());
                }

                let response = match handle_request(trimmed, &ctx).await {
                    Ok(resp) => resp,
                    Err(e) => ApiResponse::error(format!("{}", e)),
                };
                write_json(&mut writer, &response).await?;
            }
            Err(e) => {
                error!("Error reading from API client: {}", e);
                return Ok(());
            }
        }
    }
}

async fn write_json<W, T>(writer: &mut W, value: &T) -> Result<()>
where
    W: AsyncWriteExt + Unpin,
    T: Serialize,
{
    let json = serde_json::to_string(value).map_err(ShareError::Serialization)?;
    writer.write_all(json.as_bytes()).await.map_err(ShareError::Io)?;
    writer.write_all(b"\n").await.map_err(ShareError::Io)?;
    Ok(())
}

/// Handle one command
async fn handle_request(request: &str, ctx: &ApiContext) -> Result<ApiResponse> {
    let req: ApiRequest = match serde_json::from_str(request) {
        Ok(req) => req,
        Err(e) => return Ok(ApiResponse::error(format!("Invalid request: {}", e))),
    };

    match req {
        ApiRequest::Ping => Ok(ApiResponse::success(serde_json::json!({
            "message": "Pipeline is active"
        }))),
        ApiRequest::Status => {
            let (active, last_count, initialized) = ctx.supervisor.monitoring_status().await;
            let (tabs, popups) = ctx.surfaces.counts().await;
            let subscription = ctx.supervisor.state().subscription().await;
            Ok(ApiResponse::success(serde_json::json!({
                "active": active,
                "interval_ms": ctx.poll_interval_ms,
                "last_count": last_count,
                "initialized": initialized,
                "tabs": tabs,
                "popups": popups,
                "group_id": subscription.group_id,
            })))
        }
        ApiRequest::Share {
            content,
            group_id,
            sender,
            title,
            url,
        } => {
            let group_id = group_id
                .or_else(|| ctx.store.group_id())
                .ok_or_else(|| ShareError::Config("group_id is required for sharing".to_string()))?;
            let sender = sender
                .or_else(|| ctx.store.user_name())
                .unwrap_or_else(|| "Anonymous".to_string());
            let url = url.unwrap_or_default();
            let share = NewShare {
                content: content.clone(),
                group_id: group_id.clone(),
                sender,
                timestamp: chrono::Utc::now().to_rfc3339(),
                title: title.unwrap_or_default(),
                url: url.clone(),
            };

            // Sharing always reports success to the caller; initialization
            // trouble is surfaced as a warning only.
            let warning = match ctx.supervisor.ensure_initialized().await {
                Ok(()) => None,
                Err(e) => Some(e.to_string()),
            };
            ctx.client.insert(&share).await;
            ctx.dispatcher.dispatch_success(&content, &group_id, &url).await;
            let data = serde_json::json!({ "shared": true });
            Ok(match warning {
                Some(w) => ApiResponse::success_with_warning(data, w),
                None => ApiResponse::success(data),
            })
        }
        ApiRequest::Reconnect => {
            let ok = ctx.supervisor.reconnect().await;
            if ok {
                Ok(ApiResponse::success(serde_json::json!({
                    "message": "Reconnected successfully"
                })))
            } else {
                Ok(ApiResponse::error("Reconnection failed".to_string()))
            }
        }
        ApiRequest::RestartMonitoring => match ctx.supervisor.restart_monitoring().await {
            Ok(()) => Ok(ApiResponse::success(serde_json::json!({
                "message": "Monitoring restarted successfully"
            }))),
            Err(e) => Ok(ApiResponse::error(format!(
                "Failed to restart monitoring: {}",
                e
            ))),
        },
        ApiRequest::TestNotification => {
            ctx.dispatcher.dispatch_test().await;
            Ok(ApiResponse::success(serde_json::json!({
                "message": "Test notification triggered"
            })))
        }
        ApiRequest::TestConnection => {
            // Stage 1: backend health endpoint
            if let Err(e) = ctx.client.health_check().await {
                return Ok(ApiResponse::error(format!(
                    "Health check failed: {}",
                    e
                )));
            }
            // Stage 2: record query
            match ctx.client.get_latest(1).await {
                Ok(_) => Ok(ApiResponse::success(serde_json::json!({
                    "message": "Backend connection is working properly"
                }))),
                Err(e) => Ok(ApiResponse::error(format!("Record query failed: {}", e))),
            }
        }
        ApiRequest::SetGroup { group_id } => {
            ctx.supervisor.update_group(&group_id).await?;
            Ok(ApiResponse::success(serde_json::json!({
                "group_id": group_id
            })))
        }
        ApiRequest::Notifications => {
            let list = ctx.store.notifications();
            Ok(ApiResponse::success(serde_json::to_value(list)?))
        }
        ApiRequest::Errors => {
            let list = ctx.store.error_logs();
            Ok(ApiResponse::success(serde_json::to_value(list)?))
        }
        ApiRequest::Activities => {
            let list: Vec<_> = ctx
                .store
                .recent_activities()
                .into_iter()
                .map(|a| {
                    let explorer = Chain::parse(&a.chain).map(|c| c.explorer_url(&a.address));
                    serde_json::json!({
                        "address": a.address,
                        "chain": a.chain,
                        "timestamp": a.timestamp,
                        "shared_by": a.shared_by,
                        "explorer": explorer,
                    })
                })
                .collect();
            Ok(ApiResponse::success(serde_json::json!(list)))
        }
        ApiRequest::Subscribe { .. } => {
            // Handled before dispatch; reaching here means a parse raced
            Ok(ApiResponse::error("Subscribe handled elsewhere".to_string()))
        }
    }
}
