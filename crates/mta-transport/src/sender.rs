//! 发送端工作流
//!
//! 把 [`SenderSession`] 的意图落到真实 I/O 上:
//! 1. 启动传输服务器，建立 P2P 组
//! 2. 读接收端 DeviceInfo，写入 P2P 凭据
//! 3. 等待接收端连上 `/websocket` 完成握手
//! 4. 接收端通过 `/download` 取走文件并报告结果

use log::{debug, info, warn};
use mta_core::{
    CryptoProvider, EngineConfig, P256AesGcm, P2pInfo, SenderEvent, SenderIntent, SenderSession,
    SenderState, TaskId, TaskRegistry, TransferTask,
};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until, timeout, timeout_at};

use crate::drivers::{NetworkHost, RadioCentral};
use crate::error::{Result, TransportError};
use crate::server::{ServerEvent, TransferServer};

/// 会话结束后等待对端关闭通道的时间
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// 发送进度回调
pub trait SendProgressCallback: Send + Sync {
    fn on_status(&self, status: &str);
    fn on_progress(&self, sent: u64, total: u64);
    fn on_complete(&self, task_id: &str);
    fn on_error(&self, error: &str);
}

/// 发送选项
#[derive(Debug, Clone)]
pub struct SendOptions {
    /// 传输服务器监听地址
    pub bind_addr: SocketAddr,
    /// 从开始到接收端确认 sendRequest 的最长时间
    pub handshake_timeout: Duration,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 0)),
            handshake_timeout: Duration::from_secs(30),
        }
    }
}

/// 发送端工作流
pub struct Sender {
    config: EngineConfig,
    options: SendOptions,
    provider: Arc<dyn CryptoProvider>,
    registry: Arc<TaskRegistry>,
}

impl Sender {
    pub fn new(config: EngineConfig, options: SendOptions) -> Self {
        let registry = Arc::new(TaskRegistry::new(
            config.task_grace(),
            config.session_lifetime(),
        ));
        Self {
            config,
            options,
            provider: Arc::new(P256AesGcm),
            registry,
        }
    }

    /// 与下载服务共享的任务登记表
    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    /// 发送一个任务，直到接收端报告结果
    pub async fn send<C: SendProgressCallback>(
        &self,
        task: TransferTask,
        radio: &dyn RadioCentral,
        network: &dyn NetworkHost,
        callback: &C,
    ) -> Result<TaskId> {
        callback.on_status("Starting transfer server...");
        let mut server = TransferServer::bind(self.options.bind_addr, self.registry.clone()).await?;

        let network_info = match network.create_group(server.port()).await {
            Ok(info) => info,
            Err(e) => {
                callback.on_error(&e.to_string());
                return Err(e);
            }
        };
        callback.on_status(&format!("Network '{}' ready", network_info.ssid));

        let result = self
            .drive(task, network_info, &mut server, radio, callback)
            .await;

        server.shutdown();
        if let Err(e) = network.remove_group().await {
            warn!("Failed to remove network group: {}", e);
        }

        match &result {
            Ok(task_id) => {
                info!("Task {} delivered", task_id);
                callback.on_complete(task_id);
            }
            Err(e) => callback.on_error(&e.to_string()),
        }
        result
    }

    async fn drive<C: SendProgressCallback>(
        &self,
        task: TransferTask,
        network_info: P2pInfo,
        server: &mut TransferServer,
        radio: &dyn RadioCentral,
        callback: &C,
    ) -> Result<TaskId> {
        let total = task.total_size();
        let mut session =
            SenderSession::new(&self.config, self.provider.clone(), self.registry.clone());
        let mut queue = VecDeque::from([SenderEvent::Begin {
            task,
            network: network_info,
        }]);
        let mut outbound: Option<mpsc::Sender<Vec<u8>>> = None;

        let handshake_deadline = Instant::now() + self.options.handshake_timeout;
        let transfer_deadline = Instant::now() + self.config.session_lifetime();

        loop {
            while let Some(event) = queue.pop_front() {
                for intent in session.handle(event) {
                    match intent {
                        SenderIntent::ReadDeviceInfo => {
                            callback.on_status("Reading receiver info...");
                            let event =
                                match timeout_at(handshake_deadline, radio.read_device_info()).await
                                {
                                    Ok(Ok(bytes)) => SenderEvent::DeviceInfoRead(bytes),
                                    Ok(Err(e)) => SenderEvent::DeviceInfoUnavailable(e.to_string()),
                                    Err(_) => SenderEvent::TimedOut,
                                };
                            queue.push_back(event);
                        }
                        SenderIntent::WriteCredentials(data) => {
                            let event = match timeout_at(
                                handshake_deadline,
                                radio.write_credentials(&data),
                            )
                            .await
                            {
                                Ok(Ok(())) => SenderEvent::CredentialsWritten,
                                Ok(Err(e)) => SenderEvent::CredentialWriteFailed(e.to_string()),
                                Err(_) => SenderEvent::TimedOut,
                            };
                            queue.push_back(event);
                        }
                        SenderIntent::AwaitPeer { port } => {
                            callback.on_status(&format!("Waiting for receiver on port {port}..."));
                        }
                        SenderIntent::Send(frame) => {
                            let sent = match &outbound {
                                Some(tx) => tx.send(frame).await.is_ok(),
                                None => false,
                            };
                            if !sent {
                                queue.push_back(SenderEvent::ChannelClosed);
                            }
                        }
                        SenderIntent::Negotiated {
                            version,
                            encryption,
                        } => {
                            callback.on_status(&format!(
                                "Negotiated protocol v{version} (encryption {})",
                                if encryption.is_enabled() { "on" } else { "off" }
                            ));
                        }
                        SenderIntent::ServeAuthorized { task_id } => {
                            debug!("Task {} may now be downloaded", task_id);
                            callback.on_status("Receiver accepted the request");
                        }
                        SenderIntent::Finished(result) => {
                            if result.is_ok() {
                                callback.on_progress(total, total);
                            }
                            close_channel(server, outbound.take()).await;
                            return result.map_err(TransportError::from);
                        }
                    }
                }
            }

            let deadline = if matches!(
                session.state(),
                SenderState::RequestAcked | SenderState::Serving
            ) {
                transfer_deadline
            } else {
                handshake_deadline
            };

            let next = tokio::select! {
                event = server.next_event() => Some(event),
                () = sleep_until(deadline) => None,
            };

            match next {
                None => queue.push_back(SenderEvent::TimedOut),
                Some(None) => queue.push_back(SenderEvent::ChannelClosed),
                Some(Some(ServerEvent::Connected { outbound: tx })) => {
                    outbound = Some(tx);
                    queue.push_back(SenderEvent::PeerConnected {
                        port: server.port(),
                    });
                    queue.push_back(SenderEvent::ChannelOpened);
                }
                Some(Some(ServerEvent::Frame(bytes))) => queue.push_back(SenderEvent::Frame(bytes)),
                Some(Some(ServerEvent::Closed)) => {
                    outbound = None;
                    queue.push_back(SenderEvent::ChannelClosed);
                }
                Some(Some(ServerEvent::ServeStarted { task_id })) => {
                    if session.task_id() == Some(task_id.as_str()) {
                        callback.on_status("Receiver is downloading...");
                        callback.on_progress(0, total);
                        queue.push_back(SenderEvent::ServeStarted);
                    } else {
                        warn!("Serve started for unrelated task {}", task_id);
                    }
                }
            }
        }
    }
}

/// 放下发送端句柄，让服务把队列里的帧发完后关闭通道
async fn close_channel(server: &mut TransferServer, outbound: Option<mpsc::Sender<Vec<u8>>>) {
    let Some(outbound) = outbound else {
        return;
    };
    drop(outbound);

    let closed = timeout(CLOSE_GRACE, async {
        while let Some(event) = server.next_event().await {
            if matches!(event, ServerEvent::Closed) {
                break;
            }
        }
    })
    .await;
    if closed.is_err() {
        debug!("Peer did not close the handshake channel in time");
    }
}

/// 简化的发送回调实现
pub struct SimpleSendCallback {
    tx: mpsc::Sender<SendEvent>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SendEvent {
    Status(String),
    Progress { sent: u64, total: u64 },
    Complete(String),
    Error(String),
}

impl SimpleSendCallback {
    pub fn new() -> (Self, mpsc::Receiver<SendEvent>) {
        let (tx, rx) = mpsc::channel(32);
        (Self { tx }, rx)
    }
}

impl SendProgressCallback for SimpleSendCallback {
    fn on_status(&self, status: &str) {
        let _ = self.tx.try_send(SendEvent::Status(status.to_string()));
    }

    fn on_progress(&self, sent: u64, total: u64) {
        let _ = self.tx.try_send(SendEvent::Progress { sent, total });
    }

    fn on_complete(&self, task_id: &str) {
        let _ = self.tx.try_send(SendEvent::Complete(task_id.to_string()));
    }

    fn on_error(&self, error: &str) {
        let _ = self.tx.try_send(SendEvent::Error(error.to_string()));
    }
}
