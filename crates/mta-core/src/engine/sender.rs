//! 发送端状态机
//!
//! 流程:
//! 1. 读取接收端 STATUS 特征 (DeviceInfo)
//! 2. 写入 P2P 特征 (P2pInfo，接收端提供公钥时加密)
//! 3. 等待接收端加入网络并连上 WebSocket
//! 4. versionNegotiation → sendRequest
//! 5. 接收端下载，随后通过 status 报告结果

use log::{debug, info, warn};
use serde_json::Value;
use std::sync::Arc;

use super::Role;
use super::link::{Inbound, Link, parse_body};
use crate::codec::{
    Action, DeviceInfo, FileSummary, P2pInfo, SendRequest, StatusOutcome, StatusReport,
    VersionOffer, decode_device_info, encode_p2p_info,
};
use crate::config::EngineConfig;
use crate::crypto::{
    CredentialSecurity, CryptoProvider, Negotiation, SessionCryptoContext, negotiate,
};
use crate::error::{ErrorKind, SessionError};
use crate::registry::{TaskId, TaskOutcome, TaskRegistry, TransferTask};

/// 发送端输入事件
#[derive(Debug, Clone)]
pub enum SenderEvent {
    /// 开始发送：任务 + 本机已建立的网络凭据
    Begin { task: TransferTask, network: P2pInfo },
    DeviceInfoRead(Vec<u8>),
    DeviceInfoUnavailable(String),
    CredentialsWritten,
    CredentialWriteFailed(String),
    /// 对端连上了本机服务
    PeerConnected { port: u16 },
    ChannelOpened,
    Frame(Vec<u8>),
    /// 下载服务开始输出数据
    ServeStarted,
    TimedOut,
    ChannelClosed,
    Abort,
}

/// 发送端输出意图
#[derive(Debug, Clone, PartialEq)]
pub enum SenderIntent {
    ReadDeviceInfo,
    WriteCredentials(Vec<u8>),
    AwaitPeer { port: u16 },
    Send(Vec<u8>),
    Negotiated {
        version: u32,
        encryption: Negotiation,
    },
    /// 下载服务可以开始为该任务服务
    ServeAuthorized { task_id: TaskId },
    Finished(Result<TaskId, SessionError>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SenderState {
    Idle,
    Advertising,
    CredentialsWritten,
    NetworkJoinObserved,
    HandshakeConnected,
    VersionNegotiated,
    RequestSent,
    RequestAcked,
    Serving,
    Completed,
    Failed(SessionError),
}

impl SenderState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SenderState::Completed | SenderState::Failed(_))
    }
}

pub struct SenderSession {
    config: EngineConfig,
    provider: Arc<dyn CryptoProvider>,
    registry: Arc<TaskRegistry>,
    state: SenderState,
    link: Link,
    sender_id: String,
    task_id: Option<TaskId>,
    request: Option<SendRequest>,
    network: Option<P2pInfo>,
    peer: Option<DeviceInfo>,
    credentials_sent: bool,
    negotiated_version: Option<u32>,
    encryption: Negotiation,
}

impl SenderSession {
    pub fn new(
        config: &EngineConfig,
        provider: Arc<dyn CryptoProvider>,
        registry: Arc<TaskRegistry>,
    ) -> Self {
        Self {
            config: config.clone(),
            provider,
            registry,
            state: SenderState::Idle,
            link: Link::new(Role::Sender),
            sender_id: format!("{:04x}", rand::random::<u16>()),
            task_id: None,
            request: None,
            network: None,
            peer: None,
            credentials_sent: false,
            negotiated_version: None,
            encryption: Negotiation::Disabled,
        }
    }

    pub fn state(&self) -> &SenderState {
        &self.state
    }

    pub fn task_id(&self) -> Option<&str> {
        self.task_id.as_deref()
    }

    pub fn sender_id(&self) -> &str {
        &self.sender_id
    }

    /// 接收端的 DeviceInfo（读取成功后可用）
    pub fn peer(&self) -> Option<&DeviceInfo> {
        self.peer.as_ref()
    }

    pub fn negotiated_version(&self) -> Option<u32> {
        self.negotiated_version
    }

    pub fn encryption(&self) -> Negotiation {
        self.encryption
    }

    pub fn handle(&mut self, event: SenderEvent) -> Vec<SenderIntent> {
        let mut out = Vec::new();

        if self.state.is_terminal() {
            debug!("Sender ignoring {:?} in {:?}", event, self.state);
            return out;
        }

        if matches!(event, SenderEvent::Abort) {
            self.abort(&mut out);
            return out;
        }

        if let Err(err) = self.step(event, &mut out) {
            self.fail(err, &mut out);
        }
        out
    }

    fn step(&mut self, event: SenderEvent, out: &mut Vec<SenderIntent>) -> Result<(), SessionError> {
        match (&self.state, event) {
            (SenderState::Idle, SenderEvent::Begin { task, network }) => {
                self.begin(task, network, out)
            }
            (SenderState::Advertising, SenderEvent::DeviceInfoRead(bytes))
                if !self.credentials_sent =>
            {
                self.on_device_info(&bytes, out)
            }
            (SenderState::Advertising, SenderEvent::DeviceInfoUnavailable(reason)) => Err(
                SessionError::new(ErrorKind::CredentialExchangeFailed, reason),
            ),
            (SenderState::Advertising, SenderEvent::CredentialsWritten) if self.credentials_sent => {
                let port = self.network_port()?;
                self.state = SenderState::CredentialsWritten;
                out.push(SenderIntent::AwaitPeer { port });
                Ok(())
            }
            (SenderState::Advertising, SenderEvent::CredentialWriteFailed(reason)) => Err(
                SessionError::new(ErrorKind::CredentialExchangeFailed, reason),
            ),
            (SenderState::CredentialsWritten, SenderEvent::PeerConnected { port }) => {
                let expected = self.network_port()?;
                if port != expected {
                    return Err(SessionError::new(
                        ErrorKind::NetworkJoinFailed,
                        format!("peer connected on port {port}, expected {expected}"),
                    ));
                }
                info!("Peer joined network, port {}", port);
                self.state = SenderState::NetworkJoinObserved;
                Ok(())
            }
            (SenderState::NetworkJoinObserved, SenderEvent::ChannelOpened) => {
                self.state = SenderState::HandshakeConnected;
                self.send_version_negotiation(out)
            }
            (_, SenderEvent::Frame(bytes)) => {
                let inbound = self.link.receive(&bytes)?;
                self.on_inbound(inbound, out)
            }
            (SenderState::RequestAcked, SenderEvent::ServeStarted) => {
                self.state = SenderState::Serving;
                Ok(())
            }
            (_, SenderEvent::TimedOut) => Err(SessionError::new(
                ErrorKind::HandshakeTimeout,
                format!("timed out in {:?}", self.state),
            )),
            (_, SenderEvent::ChannelClosed) => Err(SessionError::violation(format!(
                "channel closed in {:?}",
                self.state
            ))),
            (state, event) => Err(SessionError::violation(format!(
                "unexpected {event:?} in {state:?}"
            ))),
        }
    }

    fn begin(
        &mut self,
        task: TransferTask,
        network: P2pInfo,
        out: &mut Vec<SenderIntent>,
    ) -> Result<(), SessionError> {
        if network.port().is_none() {
            return Err(SessionError::new(
                ErrorKind::NetworkJoinFailed,
                format!("invalid service port {}", network.port),
            ));
        }

        let request = self.build_send_request(&task);
        let task_id = self.registry.register(task)?;
        info!(
            "Sending task {} ({} file(s), {} bytes)",
            task_id, request.file_count, request.total_size
        );

        self.task_id = Some(task_id);
        self.request = Some(request);
        self.network = Some(network);
        self.state = SenderState::Advertising;
        out.push(SenderIntent::ReadDeviceInfo);
        Ok(())
    }

    fn build_send_request(&self, task: &TransferTask) -> SendRequest {
        let file_count = if task.text.is_some() && task.files.is_empty() {
            1
        } else {
            task.files.len() as u32
        };

        // 单一类型时沿用该类型，多种类型时为 */*
        let mime_type = match task.files.first() {
            None if task.text.is_some() => "text/plain".to_string(),
            None => "*/*".to_string(),
            Some(first) => {
                if task.files.iter().all(|f| f.mime_type == first.mime_type) {
                    first.mime_type.clone()
                } else {
                    "*/*".to_string()
                }
            }
        };

        SendRequest {
            task_id: Some(task.id.clone()),
            id: Some(task.id.clone()),
            sender_id: Some(self.sender_id.clone()),
            sender_name: self.config.device_name.clone(),
            file_name: task
                .files
                .first()
                .map(|f| f.name.clone())
                .unwrap_or_default(),
            mime_type,
            file_count,
            total_size: task.total_size(),
            cat_share_text: task.text.clone(),
            thumbnail: None,
            files: task
                .files
                .iter()
                .map(|f| FileSummary {
                    name: f.name.clone(),
                    size: f.size,
                })
                .collect(),
        }
    }

    fn on_device_info(
        &mut self,
        bytes: &[u8],
        out: &mut Vec<SenderIntent>,
    ) -> Result<(), SessionError> {
        let credential_error =
            |detail: String| SessionError::new(ErrorKind::CredentialExchangeFailed, detail);

        let info = decode_device_info(bytes).map_err(|e| credential_error(e.to_string()))?;
        debug!(
            "Receiver DeviceInfo: mac={}, catShare={:?}, key={}, 5GHz={}",
            info.mac,
            info.cat_share,
            info.key.is_some(),
            info.supports_5ghz()
        );

        let mut p2p = self
            .network
            .clone()
            .ok_or_else(|| SessionError::violation("no network credentials"))?;
        p2p.id = Some(self.sender_id.clone());

        let p2p = match info.key.as_deref() {
            Some(peer_key) if self.config.encryption => {
                let security =
                    CredentialSecurity::new().map_err(|e| credential_error(e.to_string()))?;
                let cipher = security
                    .derive_cipher(peer_key)
                    .map_err(|e| credential_error(e.to_string()))?;
                debug!("Sealing P2P info with receiver key");
                cipher
                    .seal_p2p_info(&p2p, &self.sender_id, security.public_key())
                    .map_err(|e| credential_error(e.to_string()))?
            }
            _ => p2p,
        };

        self.peer = Some(info);
        self.credentials_sent = true;
        out.push(SenderIntent::WriteCredentials(encode_p2p_info(&p2p)));
        Ok(())
    }

    fn send_version_negotiation(&mut self, out: &mut Vec<SenderIntent>) -> Result<(), SessionError> {
        let mut offer = VersionOffer::new(
            self.config.max_version,
            self.config.min_version,
            self.config.max_version,
        );

        if self.config.encryption {
            let ctx = SessionCryptoContext::new(self.provider.clone(), Role::Sender)?;
            offer.supports_encryption = true;
            offer.ephemeral_public_value = ctx.public_value_b64();
            self.link.install_crypto(ctx);
        }

        let frame = self
            .link
            .action(Action::VersionNegotiation, Some(to_body(&offer)?))?;
        out.push(SenderIntent::Send(frame));
        Ok(())
    }

    fn on_inbound(&mut self, inbound: Inbound, out: &mut Vec<SenderIntent>) -> Result<(), SessionError> {
        match (&self.state, inbound) {
            (
                SenderState::HandshakeConnected,
                Inbound::Ack {
                    action: Action::VersionNegotiation,
                    body,
                },
            ) => self.on_version_ack(body, out),
            (
                SenderState::RequestSent,
                Inbound::Ack {
                    action: Action::SendRequest,
                    ..
                },
            ) => {
                let task_id = self.current_task()?;
                self.registry.mark_requested(&task_id)?;
                self.state = SenderState::RequestAcked;
                out.push(SenderIntent::ServeAuthorized { task_id });
                Ok(())
            }
            (
                SenderState::RequestAcked | SenderState::Serving,
                Inbound::Action {
                    sequence,
                    action: Action::Status,
                    body,
                },
            ) => self.on_status(sequence, body, out),
            (state, inbound) => Err(SessionError::violation(format!(
                "unexpected {inbound:?} in {state:?}"
            ))),
        }
    }

    fn on_version_ack(
        &mut self,
        body: Option<Value>,
        out: &mut Vec<SenderIntent>,
    ) -> Result<(), SessionError> {
        let ack: VersionOffer = parse_body(Action::VersionNegotiation, body)?;
        let (peer_min, peer_max) = ack.range();

        if !self.config.supports_version(ack.version) || ack.version < peer_min || ack.version > peer_max
        {
            return Err(SessionError::new(
                ErrorKind::VersionUnsupported,
                format!(
                    "peer selected version {} (peer {}..={}, local {}..={})",
                    ack.version,
                    peer_min,
                    peer_max,
                    self.config.min_version,
                    self.config.max_version
                ),
            ));
        }
        let version = self.config.max_version.min(ack.version);

        let encryption = negotiate(
            self.config.encryption,
            ack.supports_encryption && ack.ephemeral_public_value.is_some(),
        );
        match (encryption, ack.ephemeral_public_value.as_deref()) {
            (Negotiation::Enabled, Some(peer_value)) => {
                let ctx = self
                    .link
                    .crypto_mut()
                    .ok_or_else(|| SessionError::violation("no local ephemeral key"))?;
                ctx.derive_key_b64(peer_value)?;
            }
            _ => self.link.discard_crypto(),
        }

        info!(
            "Version negotiated: v{}, encryption {:?}",
            version, encryption
        );
        self.negotiated_version = Some(version);
        self.encryption = encryption;
        self.state = SenderState::VersionNegotiated;
        out.push(SenderIntent::Negotiated {
            version,
            encryption,
        });

        let request = self
            .request
            .as_ref()
            .ok_or_else(|| SessionError::violation("no pending request"))?;
        let body = to_body(request)?;
        let frame = self.link.action(Action::SendRequest, Some(body))?;
        self.state = SenderState::RequestSent;
        out.push(SenderIntent::Send(frame));
        Ok(())
    }

    fn on_status(
        &mut self,
        sequence: u32,
        body: Option<Value>,
        out: &mut Vec<SenderIntent>,
    ) -> Result<(), SessionError> {
        let report: StatusReport = parse_body(Action::Status, body)?;
        let task_id = self.current_task()?;

        match report.task_id() {
            Some(reported) if reported != task_id => {
                return Err(SessionError::violation(format!(
                    "status for task {reported}, expected {task_id}"
                )));
            }
            _ => {}
        }

        let ack = self.link.ack(sequence, Action::Status, None)?;
        out.push(SenderIntent::Send(ack));

        match report.outcome() {
            StatusOutcome::Ok => {
                self.registry.mark_terminal(&task_id, TaskOutcome::Completed)?;
                self.link.discard_crypto();
                self.state = SenderState::Completed;
                info!("Task {} completed", task_id);
                out.push(SenderIntent::Finished(Ok(task_id)));
                Ok(())
            }
            StatusOutcome::Error => Err(SessionError::new(
                ErrorKind::StreamCorrupted,
                format!("receiver reported error: {}", report.reason),
            )),
            StatusOutcome::Refused => Err(SessionError::new(
                ErrorKind::TransferRefused,
                format!("receiver refused: {}", report.reason),
            )),
        }
    }

    fn network_port(&self) -> Result<u16, SessionError> {
        self.network
            .as_ref()
            .and_then(P2pInfo::port)
            .ok_or_else(|| SessionError::new(ErrorKind::NetworkJoinFailed, "no service port"))
    }

    fn current_task(&self) -> Result<TaskId, SessionError> {
        self.task_id
            .clone()
            .ok_or_else(|| SessionError::violation("no active task"))
    }

    fn fail(&mut self, err: SessionError, out: &mut Vec<SenderIntent>) {
        warn!("Sender session failed: {}", err);
        if let Some(task_id) = &self.task_id {
            // 任务可能已被清扫
            if let Err(e) = self.registry.mark_terminal(task_id, TaskOutcome::Failed) {
                debug!("Task {} not marked failed: {}", task_id, e);
            }
        }
        self.link.discard_crypto();
        self.state = SenderState::Failed(err.clone());
        out.push(SenderIntent::Finished(Err(err)));
    }

    fn abort(&mut self, out: &mut Vec<SenderIntent>) {
        info!("Sender session aborted in {:?}", self.state);
        if let Some(task_id) = &self.task_id {
            self.registry.evict(task_id);
        }
        self.link.discard_crypto();
        let err = SessionError::new(ErrorKind::Aborted, "aborted by caller");
        self.state = SenderState::Failed(err.clone());
        out.push(SenderIntent::Finished(Err(err)));
    }
}

fn to_body<T: serde::Serialize>(payload: &T) -> Result<Value, SessionError> {
    serde_json::to_value(payload)
        .map_err(|e| SessionError::violation(format!("unencodable payload: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{self, encode_device_info};
    use crate::crypto::P256AesGcm;
    use crate::registry::{FileDescriptor, TaskState};

    fn plain_config() -> EngineConfig {
        EngineConfig {
            device_name: "Linux PC".into(),
            encryption: false,
            ..Default::default()
        }
    }

    fn network() -> P2pInfo {
        P2pInfo::new(
            "DIRECT-ab12cd34".into(),
            "k3y5pa55".into(),
            "02:00:00:00:00:01".into(),
            40123,
        )
    }

    fn task() -> TransferTask {
        TransferTask::with_id(
            "t1",
            vec![
                FileDescriptor::inline("a.jpg", "image/jpeg", vec![0u8; 10]),
                FileDescriptor::inline("b.jpg", "image/jpeg", vec![0u8; 5]),
            ],
        )
    }

    fn session(config: &EngineConfig) -> (SenderSession, Arc<TaskRegistry>) {
        let registry = Arc::new(TaskRegistry::default());
        let session = SenderSession::new(config, Arc::new(P256AesGcm), registry.clone());
        (session, registry)
    }

    /// 推进到 HandshakeConnected，返回 versionNegotiation 帧
    fn connect(session: &mut SenderSession) -> Vec<u8> {
        assert_eq!(
            session.handle(SenderEvent::Begin {
                task: task(),
                network: network(),
            }),
            vec![SenderIntent::ReadDeviceInfo]
        );
        let info = DeviceInfo::new("02:00:00:00:00:02".into(), None);
        let intents = session.handle(SenderEvent::DeviceInfoRead(encode_device_info(&info)));
        assert!(matches!(intents[..], [SenderIntent::WriteCredentials(_)]));
        assert_eq!(
            session.handle(SenderEvent::CredentialsWritten),
            vec![SenderIntent::AwaitPeer { port: 40123 }]
        );
        assert!(session.handle(SenderEvent::PeerConnected { port: 40123 }).is_empty());
        match &session.handle(SenderEvent::ChannelOpened)[..] {
            [SenderIntent::Send(frame)] => frame.clone(),
            other => panic!("unexpected {other:?}"),
        }
    }

    fn finished_error(intents: &[SenderIntent]) -> ErrorKind {
        match intents.last() {
            Some(SenderIntent::Finished(Err(err))) => err.kind,
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn test_plain_credentials_written() {
        let (mut session, _) = session(&plain_config());
        session.handle(SenderEvent::Begin {
            task: task(),
            network: network(),
        });
        let info = DeviceInfo::new("02:00:00:00:00:02".into(), None);
        let intents = session.handle(SenderEvent::DeviceInfoRead(encode_device_info(&info)));

        let SenderIntent::WriteCredentials(bytes) = &intents[0] else {
            panic!("unexpected {intents:?}");
        };
        let p2p = codec::decode_p2p_info(bytes).unwrap();
        assert_eq!(p2p.ssid, "DIRECT-ab12cd34");
        assert_eq!(p2p.id.as_deref(), Some(session.sender_id()));
        assert!(!p2p.is_sealed());
    }

    #[test]
    fn test_version_negotiation_frame() {
        let (mut session, registry) = session(&plain_config());
        let frame = connect(&mut session);
        assert_eq!(session.state(), &SenderState::HandshakeConnected);
        assert_eq!(registry.state("t1"), Some(TaskState::Offered));

        let msg = codec::decode(&frame).unwrap();
        assert_eq!(msg.header(), "action:0:versionNegotiation");
    }

    #[test]
    fn test_send_request_contents() {
        let (mut session, _) = session(&plain_config());
        connect(&mut session);

        let intents = session.handle(SenderEvent::Frame(
            br#"ack:0:versionNegotiation?{"version":1,"versions":[1],"threadLimit":5}"#.to_vec(),
        ));
        assert_eq!(
            intents[0],
            SenderIntent::Negotiated {
                version: 1,
                encryption: Negotiation::Disabled,
            }
        );
        let SenderIntent::Send(frame) = &intents[1] else {
            panic!("unexpected {intents:?}");
        };
        let msg = codec::decode(frame).unwrap();
        assert_eq!(msg.header(), "action:1:sendRequest");
        let codec::Payload::Json(body) = msg.payload else {
            panic!("expected plaintext body");
        };
        assert_eq!(body["taskId"], "t1");
        assert_eq!(body["senderName"], "Linux PC");
        assert_eq!(body["fileName"], "a.jpg");
        assert_eq!(body["mimeType"], "image/jpeg");
        assert_eq!(body["fileCount"], 2);
        assert_eq!(body["totalSize"], 15);
        assert_eq!(session.state(), &SenderState::RequestSent);
    }

    #[test]
    fn test_undecodable_device_info() {
        let (mut session, registry) = session(&plain_config());
        session.handle(SenderEvent::Begin {
            task: task(),
            network: network(),
        });
        let intents = session.handle(SenderEvent::DeviceInfoRead(b"Unknown device".to_vec()));
        assert_eq!(finished_error(&intents), ErrorKind::CredentialExchangeFailed);
        assert_eq!(registry.state("t1"), Some(TaskState::Failed));
    }

    #[test]
    fn test_wrong_port_is_join_failure() {
        let (mut session, _) = session(&plain_config());
        session.handle(SenderEvent::Begin {
            task: task(),
            network: network(),
        });
        let info = DeviceInfo::new("m".into(), None);
        session.handle(SenderEvent::DeviceInfoRead(encode_device_info(&info)));
        session.handle(SenderEvent::CredentialsWritten);
        let intents = session.handle(SenderEvent::PeerConnected { port: 1 });
        assert_eq!(finished_error(&intents), ErrorKind::NetworkJoinFailed);
    }

    #[test]
    fn test_version_outside_local_range() {
        let (mut session, _) = session(&plain_config());
        connect(&mut session);
        let intents = session.handle(SenderEvent::Frame(
            br#"ack:0:versionNegotiation?{"version":7,"versions":[7]}"#.to_vec(),
        ));
        assert_eq!(finished_error(&intents), ErrorKind::VersionUnsupported);
    }

    #[test]
    fn test_status_before_request_ack_is_violation() {
        let (mut session, _) = session(&plain_config());
        connect(&mut session);
        session.handle(SenderEvent::Frame(
            br#"ack:0:versionNegotiation?{"version":1}"#.to_vec(),
        ));
        let intents = session.handle(SenderEvent::Frame(
            br#"action:100:status?{"taskId":"t1","type":1}"#.to_vec(),
        ));
        assert_eq!(finished_error(&intents), ErrorKind::ProtocolViolation);
    }

    #[test]
    fn test_refused_status() {
        let (mut session, registry) = session(&plain_config());
        connect(&mut session);
        session.handle(SenderEvent::Frame(
            br#"ack:0:versionNegotiation?{"version":1}"#.to_vec(),
        ));
        let intents = session.handle(SenderEvent::Frame(b"ack:1:sendRequest".to_vec()));
        assert_eq!(
            intents,
            vec![SenderIntent::ServeAuthorized {
                task_id: "t1".into()
            }]
        );
        assert_eq!(registry.state("t1"), Some(TaskState::Requested));

        let intents = session.handle(SenderEvent::Frame(
            br#"action:100:status?{"taskId":"t1","type":3,"reason":"user refuse"}"#.to_vec(),
        ));
        assert_eq!(intents[0], SenderIntent::Send(b"ack:100:status".to_vec()));
        assert_eq!(finished_error(&intents), ErrorKind::TransferRefused);
        assert_eq!(registry.state("t1"), Some(TaskState::Failed));
    }

    #[test]
    fn test_abort_evicts_and_terminal_ignores_events() {
        let (mut session, registry) = session(&plain_config());
        connect(&mut session);

        let intents = session.handle(SenderEvent::Abort);
        assert_eq!(finished_error(&intents), ErrorKind::Aborted);
        assert_eq!(registry.state("t1"), None);

        assert!(session.handle(SenderEvent::ChannelOpened).is_empty());
        assert!(session.handle(SenderEvent::TimedOut).is_empty());
    }

    #[test]
    fn test_failure_after_task_was_swept() {
        let (mut session, registry) = session(&plain_config());
        connect(&mut session);
        assert!(registry.evict("t1").is_some());

        let intents = session.handle(SenderEvent::TimedOut);
        assert_eq!(finished_error(&intents), ErrorKind::HandshakeTimeout);
        assert!(matches!(session.state(), SenderState::Failed(_)));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_timeout() {
        let (mut session, _) = session(&plain_config());
        connect(&mut session);
        let intents = session.handle(SenderEvent::TimedOut);
        assert_eq!(finished_error(&intents), ErrorKind::HandshakeTimeout);
    }
}
