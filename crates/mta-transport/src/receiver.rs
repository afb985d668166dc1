//! 接收端工作流
//!
//! 把 [`ReceiverSession`] 的意图落到真实 I/O 上:
//! 1. 发布 DeviceInfo，等待发送端写入 P2P 凭据
//! 2. 加入发送端网络，连接 `/websocket`
//! 3. 完成握手后从 `/download` 下载 ZIP 并解压
//!
//! 发送端使用自签名证书时开启 `use_tls`，此时跳过证书验证。

use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use mta_core::{
    CryptoProvider, EngineConfig, P256AesGcm, ReceiverEvent, ReceiverIntent, ReceiverSession,
    ReceiverState, SendRequest,
};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{Instant, timeout_at};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{Connector, MaybeTlsStream, WebSocketStream};

use crate::archive::{ReceivedFile, extract_archive};
use crate::drivers::{NetworkJoiner, RadioPeripheral};
use crate::error::{Result, TransportError};

type Channel = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// 下载缓冲的预分配上限，`totalSize` 来自对端，不可信
const PREALLOC_LIMIT: u64 = 16 * 1024 * 1024;

/// 接收进度回调
pub trait ReceiveProgressCallback: Send + Sync {
    fn on_status(&self, status: &str);
    /// 收到发送请求，返回是否接受（仅在关闭自动接收时调用）
    fn on_request(&self, request: &SendRequest) -> bool;
    fn on_text(&self, text: &str);
    fn on_progress(&self, received: u64, total: u64);
    fn on_complete(&self, outcome: &ReceiveOutcome);
    fn on_error(&self, error: &str);
}

/// 接收选项
#[derive(Debug, Clone)]
pub struct ReceiveOptions {
    /// 文件保存目录
    pub output_dir: PathBuf,
    /// 以 wss:// 与 https:// 连接发送端
    pub use_tls: bool,
    /// 收到凭据后到发送端发出 sendRequest 的最长时间
    pub handshake_timeout: Duration,
}

impl Default for ReceiveOptions {
    fn default() -> Self {
        Self {
            output_dir: dirs::download_dir().unwrap_or_else(|| PathBuf::from(".")),
            use_tls: false,
            handshake_timeout: Duration::from_secs(30),
        }
    }
}

/// 一次接收的结果
#[derive(Debug, Clone, PartialEq)]
pub struct ReceiveOutcome {
    pub task_id: String,
    pub files: Vec<ReceivedFile>,
    pub text: Option<String>,
}

/// 接收端工作流
pub struct Receiver {
    config: EngineConfig,
    options: ReceiveOptions,
    provider: Arc<dyn CryptoProvider>,
}

impl Receiver {
    pub fn new(config: EngineConfig, options: ReceiveOptions) -> Self {
        Self {
            config,
            options,
            provider: Arc::new(P256AesGcm),
        }
    }

    /// 接收一个任务
    pub async fn receive<C: ReceiveProgressCallback>(
        &self,
        radio: &dyn RadioPeripheral,
        network: &dyn NetworkJoiner,
        callback: &C,
    ) -> Result<ReceiveOutcome> {
        let result = self.drive(radio, network, callback).await;

        if let Err(e) = network.leave().await {
            warn!("Failed to leave network: {}", e);
        }

        match &result {
            Ok(outcome) => callback.on_complete(outcome),
            Err(e) => callback.on_error(&e.to_string()),
        }
        result
    }

    async fn drive<C: ReceiveProgressCallback>(
        &self,
        radio: &dyn RadioPeripheral,
        network: &dyn NetworkJoiner,
        callback: &C,
    ) -> Result<ReceiveOutcome> {
        let mut session = ReceiverSession::new(&self.config, self.provider.clone());
        let mut queue = VecDeque::from([ReceiverEvent::Publish]);
        let mut channel: Option<Channel> = None;
        let mut peer: Option<(String, u16)> = None;
        let mut files = Vec::new();
        let mut text = None;

        // 凭据到达后才开始计时
        let mut handshake_deadline = Instant::now() + self.options.handshake_timeout;
        let mut transfer_deadline = Instant::now() + self.config.session_lifetime();

        loop {
            while let Some(event) = queue.pop_front() {
                for intent in session.handle(event) {
                    match intent {
                        ReceiverIntent::PublishDeviceInfo(data) => {
                            let published = radio.publish_device_info(data).await;
                            let credentials = match published {
                                Ok(()) => {
                                    callback.on_status(&format!(
                                        "Advertising as '{}', waiting for a sender...",
                                        self.config.device_name
                                    ));
                                    radio.await_credentials().await
                                }
                                Err(e) => Err(e),
                            };
                            match credentials {
                                Ok(bytes) => {
                                    handshake_deadline =
                                        Instant::now() + self.options.handshake_timeout;
                                    transfer_deadline =
                                        Instant::now() + self.config.session_lifetime();
                                    queue.push_back(ReceiverEvent::CredentialsWritten(bytes));
                                }
                                Err(e) => {
                                    session.handle(ReceiverEvent::Abort);
                                    return Err(e);
                                }
                            }
                        }
                        ReceiverIntent::JoinNetwork(info) => {
                            callback.on_status(&format!("Joining network '{}'...", info.ssid));
                            let event = match timeout_at(handshake_deadline, network.join(&info))
                                .await
                            {
                                Ok(Ok(host)) => ReceiverEvent::NetworkJoined { host },
                                Ok(Err(e)) => ReceiverEvent::NetworkJoinFailed(e.to_string()),
                                Err(_) => ReceiverEvent::TimedOut,
                            };
                            queue.push_back(event);
                        }
                        ReceiverIntent::OpenChannel { host, port } => {
                            let event = match timeout_at(
                                handshake_deadline,
                                self.open_channel(&host, port),
                            )
                            .await
                            {
                                Ok(Ok(ws)) => {
                                    channel = Some(ws);
                                    ReceiverEvent::ChannelOpened
                                }
                                Ok(Err(e)) => {
                                    warn!("Failed to open handshake channel: {}", e);
                                    ReceiverEvent::ChannelClosed
                                }
                                Err(_) => ReceiverEvent::TimedOut,
                            };
                            peer = Some((host, port));
                            queue.push_back(event);
                        }
                        ReceiverIntent::Send(frame) => {
                            let sent = match channel.as_mut() {
                                Some(ws) => {
                                    let line = String::from_utf8_lossy(&frame).into_owned();
                                    ws.send(Message::Text(line)).await.is_ok()
                                }
                                None => false,
                            };
                            if !sent {
                                queue.push_back(ReceiverEvent::ChannelClosed);
                            }
                        }
                        ReceiverIntent::Negotiated {
                            version,
                            encryption,
                        } => {
                            callback.on_status(&format!(
                                "Negotiated protocol v{version} (encryption {})",
                                if encryption.is_enabled() { "on" } else { "off" }
                            ));
                        }
                        ReceiverIntent::ConfirmRequest(request) => {
                            let accept = callback.on_request(&request);
                            queue.push_back(ReceiverEvent::Decision { accept });
                        }
                        ReceiverIntent::Download { task_id } => {
                            let total = session.request().map_or(0, |r| r.total_size);
                            let result = match &peer {
                                Some((host, port)) => {
                                    callback.on_status("Downloading...");
                                    self.download(
                                        host,
                                        *port,
                                        &task_id,
                                        total,
                                        transfer_deadline,
                                        callback,
                                    )
                                    .await
                                }
                                None => Err(TransportError::ChannelClosed),
                            };
                            let event = match result {
                                Ok(received) => {
                                    let names = received.iter().map(|f| f.name.clone()).collect();
                                    files = received;
                                    ReceiverEvent::DownloadFinished(Ok(names))
                                }
                                Err(e) => {
                                    warn!("Download of {} failed: {}", task_id, e);
                                    ReceiverEvent::DownloadFinished(Err(e.to_string()))
                                }
                            };
                            queue.push_back(event);
                        }
                        ReceiverIntent::TextReceived { task_id, text: body } => {
                            debug!("Text share {} ({} chars)", task_id, body.chars().count());
                            callback.on_text(&body);
                            text = Some(body);
                        }
                        ReceiverIntent::Finished(result) => {
                            if let Some(mut ws) = channel.take() {
                                let _ = ws.close(None).await;
                            }
                            let task_id = result?;
                            info!("Task {} received", task_id);
                            return Ok(ReceiveOutcome {
                                task_id,
                                files,
                                text,
                            });
                        }
                    }
                }
            }

            let deadline = if matches!(
                session.state(),
                ReceiverState::RequestReceived | ReceiverState::Downloading
            ) {
                transfer_deadline
            } else {
                handshake_deadline
            };

            let event = match channel.as_mut() {
                Some(ws) => match timeout_at(deadline, next_frame(ws)).await {
                    Ok(event) => event,
                    Err(_) => ReceiverEvent::TimedOut,
                },
                None => ReceiverEvent::ChannelClosed,
            };
            if matches!(event, ReceiverEvent::ChannelClosed) {
                channel = None;
            }
            queue.push_back(event);
        }
    }

    async fn open_channel(&self, host: &str, port: u16) -> Result<Channel> {
        let channel = if self.options.use_tls {
            let url = format!("wss://{host}:{port}/websocket");
            info!("Connecting to {}", url);
            let tls = native_tls::TlsConnector::builder()
                .danger_accept_invalid_certs(true)
                .danger_accept_invalid_hostnames(true)
                .build()?;
            let (ws, _) = tokio_tungstenite::connect_async_tls_with_config(
                url,
                None,
                false,
                Some(Connector::NativeTls(tls)),
            )
            .await?;
            ws
        } else {
            let url = format!("ws://{host}:{port}/websocket");
            info!("Connecting to {}", url);
            let (ws, _) = tokio_tungstenite::connect_async(url).await?;
            ws
        };
        Ok(channel)
    }

    async fn download<C: ReceiveProgressCallback>(
        &self,
        host: &str,
        port: u16,
        task_id: &str,
        total: u64,
        deadline: Instant,
        callback: &C,
    ) -> Result<Vec<ReceivedFile>> {
        let scheme = if self.options.use_tls { "https" } else { "http" };
        let url = format!("{scheme}://{host}:{port}/download");
        info!("Downloading task {} from {}", task_id, url);

        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(self.options.use_tls)
            .build()?;

        let fetch = async {
            let response = client
                .get(&url)
                .query(&[("taskId", task_id)])
                .send()
                .await?
                .error_for_status()?;

            let capacity = usize::try_from(total.min(PREALLOC_LIMIT)).unwrap_or_default();
            let mut data = Vec::with_capacity(capacity);
            let mut stream = response.bytes_stream();
            while let Some(chunk) = stream.next().await {
                data.extend_from_slice(&chunk?);
                callback.on_progress(data.len() as u64, total);
            }
            Ok::<_, TransportError>(data)
        };

        // 下载受会话有效期约束
        let data = timeout_at(deadline, fetch)
            .await
            .map_err(|_| TransportError::TimedOut("download"))??;

        let output_dir = self.options.output_dir.clone();
        tokio::task::spawn_blocking(move || extract_archive(&data, &output_dir, |_| {}))
            .await
            .map_err(|e| TransportError::Io(std::io::Error::other(e)))?
    }
}

/// 读取下一个握手帧，忽略 ping/pong
async fn next_frame(ws: &mut Channel) -> ReceiverEvent {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => return ReceiverEvent::Frame(text.into_bytes()),
            Some(Ok(Message::Binary(data))) => return ReceiverEvent::Frame(data),
            Some(Ok(Message::Close(_))) | None => return ReceiverEvent::ChannelClosed,
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                warn!("WebSocket read error: {}", e);
                return ReceiverEvent::ChannelClosed;
            }
        }
    }
}

/// 简化的接收回调实现：自动接受所有请求
pub struct SimpleReceiveCallback {
    tx: tokio::sync::mpsc::Sender<ReceiveEvent>,
    accept: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReceiveEvent {
    Status(String),
    Request { sender_name: String, file_count: u32 },
    Text(String),
    Progress { received: u64, total: u64 },
    Complete(ReceiveOutcome),
    Error(String),
}

impl SimpleReceiveCallback {
    pub fn new(accept: bool) -> (Self, tokio::sync::mpsc::Receiver<ReceiveEvent>) {
        let (tx, rx) = tokio::sync::mpsc::channel(64);
        (Self { tx, accept }, rx)
    }
}

impl ReceiveProgressCallback for SimpleReceiveCallback {
    fn on_status(&self, status: &str) {
        let _ = self.tx.try_send(ReceiveEvent::Status(status.to_string()));
    }

    fn on_request(&self, request: &SendRequest) -> bool {
        let _ = self.tx.try_send(ReceiveEvent::Request {
            sender_name: request.sender_name.clone(),
            file_count: request.file_count,
        });
        self.accept
    }

    fn on_text(&self, text: &str) {
        let _ = self.tx.try_send(ReceiveEvent::Text(text.to_string()));
    }

    fn on_progress(&self, received: u64, total: u64) {
        let _ = self.tx.try_send(ReceiveEvent::Progress { received, total });
    }

    fn on_complete(&self, outcome: &ReceiveOutcome) {
        let _ = self.tx.try_send(ReceiveEvent::Complete(outcome.clone()));
    }

    fn on_error(&self, error: &str) {
        let _ = self.tx.try_send(ReceiveEvent::Error(error.to_string()));
    }
}
