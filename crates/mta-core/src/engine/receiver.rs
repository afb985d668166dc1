//! 接收端状态机
//!
//! 流程:
//! 1. 发布 DeviceInfo (STATUS 特征)
//! 2. 收到 P2pInfo (P2P 特征)，加入发送端网络
//! 3. 连接 WebSocket，回应 versionNegotiation / sendRequest
//! 4. 下载完成后发送 status，收到 ack 即结束

use log::{debug, info, warn};
use serde_json::Value;
use std::sync::Arc;

use super::Role;
use super::link::{Inbound, Link, parse_body};
use crate::codec::{
    Action, CAP_5GHZ, CAP_ENCRYPTION, DeviceInfo, P2pInfo, SendRequest, StatusOutcome,
    StatusReport, VersionOffer, decode_p2p_info, encode_device_info,
};
use crate::config::EngineConfig;
use crate::crypto::{
    CredentialSecurity, CryptoProvider, Negotiation, SessionCryptoContext, negotiate,
};
use crate::error::{ErrorKind, SessionError};

/// 接收端输入事件
#[derive(Debug, Clone)]
pub enum ReceiverEvent {
    Publish,
    /// 发送端写入了 P2P 特征
    CredentialsWritten(Vec<u8>),
    NetworkJoined { host: String },
    NetworkJoinFailed(String),
    ChannelOpened,
    Frame(Vec<u8>),
    /// 用户对传输请求的决定（关闭自动接收时）
    Decision { accept: bool },
    /// 下载结果：成功时为收到的文件名
    DownloadFinished(Result<Vec<String>, String>),
    TimedOut,
    ChannelClosed,
    Abort,
}

/// 接收端输出意图
#[derive(Debug, Clone, PartialEq)]
pub enum ReceiverIntent {
    PublishDeviceInfo(Vec<u8>),
    JoinNetwork(P2pInfo),
    OpenChannel { host: String, port: u16 },
    Send(Vec<u8>),
    Negotiated {
        version: u32,
        encryption: Negotiation,
    },
    /// 请用户确认，随后回送 [`ReceiverEvent::Decision`]
    ConfirmRequest(SendRequest),
    Download { task_id: String },
    TextReceived { task_id: String, text: String },
    Finished(Result<String, SessionError>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReceiverState {
    Idle,
    Advertised,
    CredentialsReceived,
    NetworkJoined,
    HandshakeConnected,
    VersionNegotiated,
    RequestReceived,
    Downloading,
    Completed,
    Failed(SessionError),
}

impl ReceiverState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ReceiverState::Completed | ReceiverState::Failed(_))
    }
}

pub struct ReceiverSession {
    config: EngineConfig,
    provider: Arc<dyn CryptoProvider>,
    state: ReceiverState,
    link: Link,
    security: Option<CredentialSecurity>,
    credentials: Option<P2pInfo>,
    request: Option<SendRequest>,
    task_id: Option<String>,
    awaiting_decision: bool,
    /// 已发出、等待 ack 的 status
    reported: Option<StatusOutcome>,
    negotiated_version: Option<u32>,
    encryption: Negotiation,
}

impl ReceiverSession {
    pub fn new(config: &EngineConfig, provider: Arc<dyn CryptoProvider>) -> Self {
        Self {
            config: config.clone(),
            provider,
            state: ReceiverState::Idle,
            link: Link::new(Role::Receiver),
            security: None,
            credentials: None,
            request: None,
            task_id: None,
            awaiting_decision: false,
            reported: None,
            negotiated_version: None,
            encryption: Negotiation::Disabled,
        }
    }

    pub fn state(&self) -> &ReceiverState {
        &self.state
    }

    pub fn request(&self) -> Option<&SendRequest> {
        self.request.as_ref()
    }

    pub fn task_id(&self) -> Option<&str> {
        self.task_id.as_deref()
    }

    pub fn negotiated_version(&self) -> Option<u32> {
        self.negotiated_version
    }

    pub fn encryption(&self) -> Negotiation {
        self.encryption
    }

    pub fn handle(&mut self, event: ReceiverEvent) -> Vec<ReceiverIntent> {
        let mut out = Vec::new();

        if self.state.is_terminal() {
            debug!("Receiver ignoring {:?} in {:?}", event, self.state);
            return out;
        }

        if matches!(event, ReceiverEvent::Abort) {
            info!("Receiver session aborted in {:?}", self.state);
            self.fail(SessionError::new(ErrorKind::Aborted, "aborted by caller"), &mut out);
            return out;
        }

        if let Err(err) = self.step(event, &mut out) {
            self.fail(err, &mut out);
        }
        out
    }

    fn step(
        &mut self,
        event: ReceiverEvent,
        out: &mut Vec<ReceiverIntent>,
    ) -> Result<(), SessionError> {
        match (&self.state, event) {
            (ReceiverState::Idle, ReceiverEvent::Publish) => self.publish(out),
            (ReceiverState::Advertised, ReceiverEvent::CredentialsWritten(bytes)) => {
                self.on_credentials(&bytes, out)
            }
            (ReceiverState::CredentialsReceived, ReceiverEvent::NetworkJoined { host }) => {
                let port = self
                    .credentials
                    .as_ref()
                    .and_then(P2pInfo::port)
                    .ok_or_else(|| {
                        SessionError::new(ErrorKind::NetworkJoinFailed, "no service port")
                    })?;
                info!("Joined sender network, peer at {}:{}", host, port);
                self.state = ReceiverState::NetworkJoined;
                out.push(ReceiverIntent::OpenChannel { host, port });
                Ok(())
            }
            (ReceiverState::CredentialsReceived, ReceiverEvent::NetworkJoinFailed(reason)) => {
                Err(SessionError::new(ErrorKind::NetworkJoinFailed, reason))
            }
            (ReceiverState::NetworkJoined, ReceiverEvent::ChannelOpened) => {
                self.state = ReceiverState::HandshakeConnected;
                Ok(())
            }
            (_, ReceiverEvent::Frame(bytes)) => {
                let inbound = self.link.receive(&bytes)?;
                self.on_inbound(inbound, out)
            }
            (ReceiverState::RequestReceived, ReceiverEvent::Decision { accept })
                if self.awaiting_decision =>
            {
                self.awaiting_decision = false;
                if accept {
                    self.start_download(out)
                } else {
                    info!("Transfer refused by user");
                    self.report(StatusOutcome::Refused, "user refuse", out)
                }
            }
            (ReceiverState::Downloading, ReceiverEvent::DownloadFinished(result))
                if self.reported.is_none() =>
            {
                self.on_download_finished(result, out)
            }
            (_, ReceiverEvent::TimedOut) => Err(SessionError::new(
                ErrorKind::HandshakeTimeout,
                format!("timed out in {:?}", self.state),
            )),
            (_, ReceiverEvent::ChannelClosed) => Err(SessionError::violation(format!(
                "channel closed in {:?}",
                self.state
            ))),
            (state, event) => Err(SessionError::violation(format!(
                "unexpected {event:?} in {state:?}"
            ))),
        }
    }

    fn publish(&mut self, out: &mut Vec<ReceiverIntent>) -> Result<(), SessionError> {
        let mut capabilities = 0;
        let key = if self.config.encryption {
            let security = CredentialSecurity::new()
                .map_err(|e| SessionError::new(ErrorKind::CredentialExchangeFailed, e.to_string()))?;
            let key = security.public_key().to_string();
            self.security = Some(security);
            capabilities |= CAP_ENCRYPTION;
            Some(key)
        } else {
            None
        };
        if self.config.supports_5ghz {
            capabilities |= CAP_5GHZ;
        }

        let mut info = DeviceInfo::new(self.config.mac_address.clone(), key);
        info.cat_share = Some(self.config.max_version);
        info.name = Some(self.config.device_name.clone());
        info.brand = Some(self.config.brand_id.id());
        info.min_version = Some(self.config.min_version);
        info.capabilities = capabilities;

        debug!("Publishing DeviceInfo: {:?}", info);
        self.state = ReceiverState::Advertised;
        out.push(ReceiverIntent::PublishDeviceInfo(encode_device_info(&info)));
        Ok(())
    }

    fn on_credentials(
        &mut self,
        bytes: &[u8],
        out: &mut Vec<ReceiverIntent>,
    ) -> Result<(), SessionError> {
        let credential_error =
            |detail: String| SessionError::new(ErrorKind::CredentialExchangeFailed, detail);

        let written = decode_p2p_info(bytes).map_err(|e| credential_error(e.to_string()))?;

        let p2p = match written.key.as_deref() {
            Some(sender_key) => {
                // 私钥只用这一次
                let security = self.security.take().ok_or_else(|| {
                    credential_error("sealed credentials but no local key was published".into())
                })?;
                let cipher = security
                    .derive_cipher(sender_key)
                    .map_err(|e| credential_error(e.to_string()))?;
                cipher
                    .open_p2p_info(&written)
                    .map_err(|e| credential_error(e.to_string()))?
            }
            None => {
                self.security = None;
                written
            }
        };

        if p2p.port().is_none() {
            return Err(credential_error(format!("invalid port {}", p2p.port)));
        }

        info!(
            "Received P2P info from sender {:?}: ssid='{}', port={}",
            p2p.id, p2p.ssid, p2p.port
        );
        self.credentials = Some(p2p.clone());
        self.state = ReceiverState::CredentialsReceived;
        out.push(ReceiverIntent::JoinNetwork(p2p));
        Ok(())
    }

    fn on_inbound(
        &mut self,
        inbound: Inbound,
        out: &mut Vec<ReceiverIntent>,
    ) -> Result<(), SessionError> {
        match (&self.state, inbound) {
            (
                ReceiverState::HandshakeConnected,
                Inbound::Action {
                    sequence,
                    action: Action::VersionNegotiation,
                    body,
                },
            ) => self.on_version_negotiation(sequence, body, out),
            (
                ReceiverState::VersionNegotiated,
                Inbound::Action {
                    sequence,
                    action: Action::SendRequest,
                    body,
                },
            ) => self.on_send_request(sequence, body, out),
            (
                _,
                Inbound::Ack {
                    action: Action::Status,
                    ..
                },
            ) if self.reported.is_some() => self.on_status_ack(out),
            (state, inbound) => Err(SessionError::violation(format!(
                "unexpected {inbound:?} in {state:?}"
            ))),
        }
    }

    fn on_version_negotiation(
        &mut self,
        sequence: u32,
        body: Option<Value>,
        out: &mut Vec<ReceiverIntent>,
    ) -> Result<(), SessionError> {
        let offer: VersionOffer = parse_body(Action::VersionNegotiation, body)?;
        let (peer_min, peer_max) = offer.range();

        let version = self.config.max_version.min(peer_max);
        let floor = self.config.min_version.max(peer_min);

        let mut ack = VersionOffer::new(version, self.config.min_version, self.config.max_version);
        ack.thread_limit = Some(self.config.thread_limit);

        if version < floor {
            let frame = self
                .link
                .ack(sequence, Action::VersionNegotiation, Some(to_body(&ack)?))?;
            out.push(ReceiverIntent::Send(frame));
            return Err(SessionError::new(
                ErrorKind::VersionUnsupported,
                format!(
                    "no common version: peer {}..={}, local {}..={}",
                    peer_min, peer_max, self.config.min_version, self.config.max_version
                ),
            ));
        }

        let encryption = negotiate(
            self.config.encryption,
            offer.supports_encryption && offer.ephemeral_public_value.is_some(),
        );
        if let (Negotiation::Enabled, Some(peer_value)) =
            (encryption, offer.ephemeral_public_value.as_deref())
        {
            let mut ctx = SessionCryptoContext::new(self.provider.clone(), Role::Receiver)?;
            ack.supports_encryption = true;
            ack.ephemeral_public_value = ctx.public_value_b64();
            ctx.derive_key_b64(peer_value)?;
            self.link.install_crypto(ctx);
        }

        // versionNegotiation 的 ack 始终明文
        let frame = self
            .link
            .ack(sequence, Action::VersionNegotiation, Some(to_body(&ack)?))?;
        out.push(ReceiverIntent::Send(frame));

        info!("Version negotiated: v{}, encryption {:?}", version, encryption);
        self.negotiated_version = Some(version);
        self.encryption = encryption;
        self.state = ReceiverState::VersionNegotiated;
        out.push(ReceiverIntent::Negotiated {
            version,
            encryption,
        });
        Ok(())
    }

    fn on_send_request(
        &mut self,
        sequence: u32,
        body: Option<Value>,
        out: &mut Vec<ReceiverIntent>,
    ) -> Result<(), SessionError> {
        let request: SendRequest = parse_body(Action::SendRequest, body)?;
        let task_id = request
            .task_id()
            .ok_or_else(|| SessionError::violation("sendRequest without task id"))?
            .to_string();

        let frame = self.link.ack(sequence, Action::SendRequest, None)?;
        out.push(ReceiverIntent::Send(frame));

        info!(
            "Send request from {}: task {}, {} file(s), {} bytes{}",
            request.sender_name,
            task_id,
            request.file_count,
            request.total_size,
            if request.is_text() { " (text)" } else { "" }
        );
        self.state = ReceiverState::RequestReceived;
        self.task_id = Some(task_id.clone());
        self.request = Some(request.clone());

        if let Some(text) = request.cat_share_text.clone() {
            out.push(ReceiverIntent::TextReceived { task_id, text });
            return self.report(StatusOutcome::Ok, "", out);
        }

        if self.config.auto_accept {
            self.start_download(out)
        } else {
            self.awaiting_decision = true;
            out.push(ReceiverIntent::ConfirmRequest(request));
            Ok(())
        }
    }

    fn start_download(&mut self, out: &mut Vec<ReceiverIntent>) -> Result<(), SessionError> {
        let task_id = self.current_task()?;
        self.state = ReceiverState::Downloading;
        out.push(ReceiverIntent::Download { task_id });
        Ok(())
    }

    fn on_download_finished(
        &mut self,
        result: Result<Vec<String>, String>,
        out: &mut Vec<ReceiverIntent>,
    ) -> Result<(), SessionError> {
        let reason = match result {
            Ok(names) => match self.verify_received(&names) {
                Ok(()) => return self.report(StatusOutcome::Ok, "", out),
                Err(reason) => reason,
            },
            Err(reason) => reason,
        };

        self.report(StatusOutcome::Error, &reason, out)?;
        Err(SessionError::new(ErrorKind::StreamCorrupted, reason))
    }

    /// 对照 sendRequest 检查收到的文件
    fn verify_received(&self, names: &[String]) -> Result<(), String> {
        let Some(request) = &self.request else {
            return Err("no request".into());
        };

        if !request.files.is_empty() {
            let mut expected: Vec<&str> = request.files.iter().map(|f| f.name.as_str()).collect();
            let mut received: Vec<&str> = names.iter().map(String::as_str).collect();
            expected.sort_unstable();
            received.sort_unstable();
            if expected != received {
                return Err(format!(
                    "received {:?}, expected {:?}",
                    received, expected
                ));
            }
        } else if names.len() != request.file_count as usize {
            return Err(format!(
                "received {} file(s), expected {}",
                names.len(),
                request.file_count
            ));
        }
        Ok(())
    }

    fn report(
        &mut self,
        outcome: StatusOutcome,
        reason: &str,
        out: &mut Vec<ReceiverIntent>,
    ) -> Result<(), SessionError> {
        let task_id = self.current_task()?;
        let status = StatusReport::new(&task_id, outcome, reason);
        let frame = self.link.action(Action::Status, Some(to_body(&status)?))?;
        self.reported = Some(outcome);
        out.push(ReceiverIntent::Send(frame));
        Ok(())
    }

    fn on_status_ack(&mut self, out: &mut Vec<ReceiverIntent>) -> Result<(), SessionError> {
        match self.reported.take() {
            Some(StatusOutcome::Ok) => {
                let task_id = self.current_task()?;
                self.link.discard_crypto();
                self.state = ReceiverState::Completed;
                info!("Task {} completed", task_id);
                out.push(ReceiverIntent::Finished(Ok(task_id)));
                Ok(())
            }
            Some(StatusOutcome::Refused) => Err(SessionError::new(
                ErrorKind::TransferRefused,
                "transfer refused by user",
            )),
            other => Err(SessionError::violation(format!(
                "status ack after {other:?}"
            ))),
        }
    }

    fn current_task(&self) -> Result<String, SessionError> {
        self.task_id
            .clone()
            .ok_or_else(|| SessionError::violation("no active task"))
    }

    fn fail(&mut self, err: SessionError, out: &mut Vec<ReceiverIntent>) {
        if err.kind != ErrorKind::Aborted {
            warn!("Receiver session failed: {}", err);
        }
        self.security = None;
        self.link.discard_crypto();
        self.state = ReceiverState::Failed(err.clone());
        out.push(ReceiverIntent::Finished(Err(err)));
    }
}

fn to_body<T: serde::Serialize>(payload: &T) -> Result<Value, SessionError> {
    serde_json::to_value(payload)
        .map_err(|e| SessionError::violation(format!("unencodable payload: {e}")))
}
