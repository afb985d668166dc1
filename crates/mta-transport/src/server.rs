//! 发送端服务
//!
//! 同一端口上提供:
//!
//! - `GET /websocket`: 握手通道，同一时间只允许一个连接
//! - `GET /download?taskId=<id>`: ZIP 下载，每个任务只服务一次
//!
//! 服务本身不解析握手消息，只把原始帧交给发送端会话。

use axum::{
    Router,
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use mta_core::{RegistryError, ServeGrant, TaskId, TaskRegistry};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::archive::build_archive;
use crate::error::Result;

/// 下载请求可能先于发送端处理 sendRequest 的 ack 到达，在此期间重试
const SERVE_RETRY_INTERVAL: Duration = Duration::from_millis(50);
const SERVE_RETRY_ATTEMPTS: u32 = 40;

const SWEEP_INTERVAL: Duration = Duration::from_secs(5);

/// 交给发送端会话的服务事件
#[derive(Debug)]
pub enum ServerEvent {
    /// 握手通道已建立，写入 `outbound` 的帧会发给对端
    Connected { outbound: mpsc::Sender<Vec<u8>> },
    Frame(Vec<u8>),
    Closed,
    ServeStarted { task_id: TaskId },
}

#[derive(Deserialize)]
struct DownloadQuery {
    #[serde(rename = "taskId")]
    task_id: String,
}

struct ServerState {
    registry: Arc<TaskRegistry>,
    events: mpsc::Sender<ServerEvent>,
    channel_taken: AtomicBool,
}

/// 传输服务器
pub struct TransferServer {
    port: u16,
    events: mpsc::Receiver<ServerEvent>,
    shutdown: Option<oneshot::Sender<()>>,
    sweeper: Option<JoinHandle<()>>,
}

impl TransferServer {
    /// 绑定地址并开始服务（端口 0 表示随机端口）
    pub async fn bind(addr: SocketAddr, registry: Arc<TaskRegistry>) -> Result<Self> {
        let (events_tx, events) = mpsc::channel(64);
        let state = Arc::new(ServerState {
            registry: registry.clone(),
            events: events_tx,
            channel_taken: AtomicBool::new(false),
        });

        let app = Router::new()
            .route("/websocket", get(websocket_handler))
            .route("/download", get(download_handler))
            .with_state(state);

        let listener = TcpListener::bind(addr).await?;
        let port = listener.local_addr()?.port();

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            });
            if let Err(e) = serve.await {
                error!("Transfer server error: {}", e);
            }
        });

        let sweeper = tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                interval.tick().await;
                let swept = registry.sweep();
                for (task_id, outcome) in &swept {
                    debug!("Swept task {} ({:?})", task_id, outcome);
                }
                if !swept.is_empty() {
                    debug!("{} task(s) still registered", registry.len());
                }
            }
        });

        info!("Transfer server listening on {}", port);

        Ok(Self {
            port,
            events,
            shutdown: Some(shutdown_tx),
            sweeper: Some(sweeper),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub async fn next_event(&mut self) -> Option<ServerEvent> {
        self.events.recv().await
    }

    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
            debug!("Transfer server on {} shutting down", self.port);
        }
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.abort();
        }
    }
}

impl Drop for TransferServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ServerState>>,
) -> Response {
    if state.channel_taken.swap(true, Ordering::SeqCst) {
        warn!("Rejecting second handshake channel");
        return (StatusCode::CONFLICT, "handshake channel already open").into_response();
    }
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<ServerState>) {
    let (outbound, mut outgoing) = mpsc::channel::<Vec<u8>>(16);
    if state
        .events
        .send(ServerEvent::Connected { outbound })
        .await
        .is_err()
    {
        return;
    }
    info!("Handshake channel connected");

    let (mut sink, mut stream) = socket.split();
    loop {
        tokio::select! {
            frame = outgoing.recv() => match frame {
                Some(bytes) => {
                    let text = String::from_utf8_lossy(&bytes).into_owned();
                    if let Err(e) = sink.send(Message::Text(text)).await {
                        warn!("WebSocket send failed: {}", e);
                        break;
                    }
                }
                // 会话已结束，队列中的帧都已发出
                None => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if state.events.send(ServerEvent::Frame(text.into_bytes())).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Binary(data))) => {
                    if state.events.send(ServerEvent::Frame(data)).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("WebSocket read error: {}", e);
                    break;
                }
            },
        }
    }

    debug!("Handshake channel closed");
    let _ = state.events.send(ServerEvent::Closed).await;
}

async fn download_handler(
    Query(query): Query<DownloadQuery>,
    State(state): State<Arc<ServerState>>,
) -> Response {
    info!("Download request for task_id={}", query.task_id);

    let grant = match authorize(&state.registry, &query.task_id).await {
        Ok(grant) => grant,
        Err(err) => {
            warn!("Download refused: {}", err);
            return (status_for(&err), err.to_string()).into_response();
        }
    };

    let _ = state
        .events
        .send(ServerEvent::ServeStarted {
            task_id: grant.task_id.clone(),
        })
        .await;

    let files = grant.files;
    match tokio::task::spawn_blocking(move || build_archive(&files)).await {
        Ok(Ok(data)) => (
            [
                (header::CONTENT_TYPE, "application/zip"),
                (
                    header::CONTENT_DISPOSITION,
                    "attachment; filename=\"files.zip\"",
                ),
            ],
            data,
        )
            .into_response(),
        Ok(Err(e)) => {
            error!("Failed to build archive for {}: {}", grant.task_id, e);
            (StatusCode::INTERNAL_SERVER_ERROR, "failed to build archive").into_response()
        }
        Err(e) => {
            error!("Archive task panicked: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn authorize(registry: &TaskRegistry, task_id: &str) -> std::result::Result<ServeGrant, RegistryError> {
    let mut attempts = 0;
    loop {
        match registry.authorize_serve(task_id) {
            Err(RegistryError::NotRequested(_)) if attempts < SERVE_RETRY_ATTEMPTS => {
                attempts += 1;
                tokio::time::sleep(SERVE_RETRY_INTERVAL).await;
            }
            result => return result,
        }
    }
}

fn status_for(err: &RegistryError) -> StatusCode {
    match err {
        RegistryError::NotFound(_) | RegistryError::NotRequested(_) => StatusCode::NOT_FOUND,
        RegistryError::AlreadyServing(_)
        | RegistryError::Terminal(_)
        | RegistryError::Duplicate(_) => StatusCode::CONFLICT,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_errors_map_to_http_status() {
        let id = "t".to_string();
        assert_eq!(status_for(&RegistryError::NotFound(id.clone())), StatusCode::NOT_FOUND);
        assert_eq!(status_for(&RegistryError::NotRequested(id.clone())), StatusCode::NOT_FOUND);
        assert_eq!(status_for(&RegistryError::AlreadyServing(id.clone())), StatusCode::CONFLICT);
        assert_eq!(status_for(&RegistryError::Terminal(id)), StatusCode::CONFLICT);
    }
}
