//! 集成测试 - 发送端与接收端状态机对跑
//!
//! 不做任何 I/O：一个 FIFO 队列扮演 BLE / WiFi / WebSocket / HTTP，
//! 按产生顺序把一方的意图投递为另一方的事件。

use std::collections::VecDeque;
use std::sync::Arc;

use mta_core::codec::encode_device_info;
use mta_core::{
    CryptoProvider, DeviceInfo, EngineConfig, ErrorKind, FileDescriptor, Negotiation, P256AesGcm,
    P2pInfo, ReceiverEvent, ReceiverIntent, ReceiverSession, ReceiverState, SenderEvent,
    SenderIntent, SenderSession, SenderState, SessionError, TaskRegistry, TaskState, TransferTask,
};

enum Step {
    ToSender(SenderEvent),
    ToReceiver(ReceiverEvent),
    /// 接收端发起 GET /download
    Serve(String),
}

type Tamper = Box<dyn FnMut(Vec<u8>) -> Vec<u8>>;

struct Harness {
    sender: SenderSession,
    receiver: ReceiverSession,
    registry: Arc<TaskRegistry>,
    queue: VecDeque<Step>,
    device_info: Vec<u8>,
    accept: bool,
    to_receiver: Tamper,
    to_sender: Tamper,
    /// 线上帧（文本形式，按发送顺序）
    wire: Vec<String>,
    credentials: Vec<Vec<u8>>,
    texts: Vec<String>,
    sender_negotiated: Option<(u32, Negotiation)>,
    receiver_negotiated: Option<(u32, Negotiation)>,
    sender_result: Option<Result<String, SessionError>>,
    receiver_result: Option<Result<String, SessionError>>,
}

impl Harness {
    fn new(sender_config: EngineConfig, receiver_config: EngineConfig) -> Self {
        let provider: Arc<dyn CryptoProvider> = Arc::new(P256AesGcm);
        let registry = Arc::new(TaskRegistry::default());
        Self {
            sender: SenderSession::new(&sender_config, provider.clone(), registry.clone()),
            receiver: ReceiverSession::new(&receiver_config, provider),
            registry,
            queue: VecDeque::new(),
            device_info: Vec::new(),
            accept: true,
            to_receiver: Box::new(|frame| frame),
            to_sender: Box::new(|frame| frame),
            wire: Vec::new(),
            credentials: Vec::new(),
            texts: Vec::new(),
            sender_negotiated: None,
            receiver_negotiated: None,
            sender_result: None,
            receiver_result: None,
        }
    }

    fn run(&mut self, task: TransferTask) {
        self.queue.push_back(Step::ToReceiver(ReceiverEvent::Publish));
        self.queue.push_back(Step::ToSender(SenderEvent::Begin {
            task,
            network: P2pInfo::new(
                "DIRECT-ab12cd34".into(),
                "k3y5pa55".into(),
                "02:00:00:00:00:01".into(),
                40123,
            ),
        }));

        let mut budget = 200;
        while let Some(step) = self.queue.pop_front() {
            budget -= 1;
            assert!(budget > 0, "session did not settle");
            match step {
                Step::ToSender(event) => {
                    for intent in self.sender.handle(event) {
                        self.on_sender_intent(intent);
                    }
                }
                Step::ToReceiver(event) => {
                    for intent in self.receiver.handle(event) {
                        self.on_receiver_intent(intent);
                    }
                }
                Step::Serve(task_id) => {
                    let result = match self.registry.authorize_serve(&task_id) {
                        Ok(grant) => {
                            self.queue.push_back(Step::ToSender(SenderEvent::ServeStarted));
                            Ok(grant.files.into_iter().map(|f| f.name).collect())
                        }
                        Err(e) => Err(e.to_string()),
                    };
                    self.queue
                        .push_back(Step::ToReceiver(ReceiverEvent::DownloadFinished(result)));
                }
            }
        }
    }

    fn on_sender_intent(&mut self, intent: SenderIntent) {
        match intent {
            SenderIntent::ReadDeviceInfo => {
                let info = self.device_info.clone();
                self.queue
                    .push_back(Step::ToSender(SenderEvent::DeviceInfoRead(info)));
            }
            SenderIntent::WriteCredentials(bytes) => {
                self.credentials.push(bytes.clone());
                self.queue
                    .push_back(Step::ToReceiver(ReceiverEvent::CredentialsWritten(bytes)));
                self.queue
                    .push_back(Step::ToSender(SenderEvent::CredentialsWritten));
            }
            SenderIntent::AwaitPeer { .. } | SenderIntent::ServeAuthorized { .. } => {}
            SenderIntent::Send(frame) => {
                let frame = (self.to_receiver)(frame);
                self.wire.push(String::from_utf8_lossy(&frame).into_owned());
                self.queue
                    .push_back(Step::ToReceiver(ReceiverEvent::Frame(frame)));
            }
            SenderIntent::Negotiated {
                version,
                encryption,
            } => self.sender_negotiated = Some((version, encryption)),
            SenderIntent::Finished(result) => self.sender_result = Some(result),
        }
    }

    fn on_receiver_intent(&mut self, intent: ReceiverIntent) {
        match intent {
            ReceiverIntent::PublishDeviceInfo(bytes) => self.device_info = bytes,
            ReceiverIntent::JoinNetwork(p2p) => {
                let port = p2p.port().expect("valid port");
                self.queue
                    .push_back(Step::ToSender(SenderEvent::PeerConnected { port }));
                self.queue.push_back(Step::ToReceiver(ReceiverEvent::NetworkJoined {
                    host: "192.168.49.1".into(),
                }));
            }
            ReceiverIntent::OpenChannel { .. } => {
                self.queue
                    .push_back(Step::ToReceiver(ReceiverEvent::ChannelOpened));
                self.queue.push_back(Step::ToSender(SenderEvent::ChannelOpened));
            }
            ReceiverIntent::Send(frame) => {
                let frame = (self.to_sender)(frame);
                self.wire.push(String::from_utf8_lossy(&frame).into_owned());
                self.queue.push_back(Step::ToSender(SenderEvent::Frame(frame)));
            }
            ReceiverIntent::Negotiated {
                version,
                encryption,
            } => self.receiver_negotiated = Some((version, encryption)),
            ReceiverIntent::ConfirmRequest(_) => {
                let accept = self.accept;
                self.queue
                    .push_back(Step::ToReceiver(ReceiverEvent::Decision { accept }));
            }
            ReceiverIntent::Download { task_id } => self.queue.push_back(Step::Serve(task_id)),
            ReceiverIntent::TextReceived { text, .. } => self.texts.push(text),
            ReceiverIntent::Finished(result) => self.receiver_result = Some(result),
        }
    }

    fn sender_error(&self) -> ErrorKind {
        match &self.sender_result {
            Some(Err(err)) => err.kind,
            other => panic!("sender did not fail: {other:?}"),
        }
    }

    fn receiver_error(&self) -> ErrorKind {
        match &self.receiver_result {
            Some(Err(err)) => err.kind,
            other => panic!("receiver did not fail: {other:?}"),
        }
    }

    fn headers(&self) -> Vec<&str> {
        self.wire
            .iter()
            .map(|frame| frame.split('?').next().unwrap_or_default())
            .collect()
    }
}

fn plain() -> EngineConfig {
    EngineConfig {
        encryption: false,
        ..Default::default()
    }
}

fn encrypted() -> EngineConfig {
    EngineConfig {
        encryption: true,
        ..Default::default()
    }
}

fn vanilla_task() -> TransferTask {
    TransferTask::with_id(
        "t1",
        vec![FileDescriptor::inline("a.txt", "text/plain", vec![b'x'; 10])],
    )
}

/// 发送 t1 = [a.txt, 10 字节]：接收端下载 t1，报告成功，登记表标记完成
#[test]
fn test_vanilla_transfer() {
    let mut h = Harness::new(plain(), plain());
    h.run(vanilla_task());

    assert_eq!(h.sender_result, Some(Ok("t1".to_string())));
    assert_eq!(h.receiver_result, Some(Ok("t1".to_string())));
    assert_eq!(h.sender.state(), &SenderState::Completed);
    assert_eq!(h.receiver.state(), &ReceiverState::Completed);
    assert_eq!(h.registry.state("t1"), Some(TaskState::Completed));

    assert_eq!(
        h.headers(),
        vec![
            "action:0:versionNegotiation",
            "ack:0:versionNegotiation",
            "action:1:sendRequest",
            "ack:1:sendRequest",
            "action:100:status",
            "ack:100:status",
        ]
    );
    assert!(h.wire[2].contains(r#""taskId":"t1""#));
    assert!(h.wire[4].contains(r#""type":1"#));

    let request = h.receiver.request().unwrap();
    assert_eq!(request.file_count, 1);
    assert_eq!(request.files[0].name, "a.txt");
    assert_eq!(request.files[0].size, 10);
}

#[test]
fn test_encrypted_session() {
    let mut h = Harness::new(encrypted(), encrypted());
    h.run(vanilla_task());

    assert_eq!(h.sender_negotiated, Some((1, Negotiation::Enabled)));
    assert_eq!(h.receiver_negotiated, Some((1, Negotiation::Enabled)));
    assert_eq!(h.sender_result, Some(Ok("t1".to_string())));
    assert_eq!(h.receiver_result, Some(Ok("t1".to_string())));

    // versionNegotiation 明文，之后的载荷全部密封
    assert!(h.wire[0].contains("ephemeralPublicValue"));
    assert!(h.wire[1].contains("ephemeralPublicValue"));
    assert!(h.wire[2].starts_with("action:1:sendRequest?!"));
    assert!(!h.wire[2].contains("a.txt"));
    assert!(h.wire[4].starts_with("action:100:status?!"));

    // 凭据同样加密
    let p2p = mta_core::codec::decode_p2p_info(&h.credentials[0]).unwrap();
    assert!(p2p.is_sealed());
    assert_ne!(p2p.ssid, "DIRECT-ab12cd34");
}

#[test]
fn test_encryption_declined_by_peer() {
    let mut h = Harness::new(encrypted(), plain());
    h.run(vanilla_task());

    assert_eq!(h.sender_negotiated, Some((1, Negotiation::Disabled)));
    assert_eq!(h.receiver_negotiated, Some((1, Negotiation::Disabled)));
    assert_eq!(h.sender_result, Some(Ok("t1".to_string())));
    assert!(h.wire[2].contains("a.txt"));

    let p2p = mta_core::codec::decode_p2p_info(&h.credentials[0]).unwrap();
    assert!(!p2p.is_sealed());
}

#[test]
fn test_tampered_ciphertext_fails_authentication() {
    let mut h = Harness::new(encrypted(), encrypted());
    h.to_receiver = Box::new(|frame| {
        let mut message = mta_core::codec::decode(&frame).unwrap();
        if let mta_core::Payload::Sealed(bytes) = &mut message.payload {
            let last = bytes.len() - 1;
            bytes[last] ^= 0x01;
        }
        mta_core::codec::encode(&message)
    });
    h.run(vanilla_task());

    assert_eq!(h.receiver_error(), ErrorKind::AuthenticationFailed);
    // 发送端仍在等 sendRequest 的 ack
    assert_eq!(h.sender.state(), &SenderState::RequestSent);
    assert!(h.sender_result.is_none());
}

#[test]
fn test_sender_rejects_mismatched_ack() {
    let mut h = Harness::new(plain(), plain());
    h.to_sender = Box::new(|frame| {
        String::from_utf8(frame)
            .unwrap()
            .replacen("ack:1:", "ack:2:", 1)
            .into_bytes()
    });
    h.run(vanilla_task());

    assert_eq!(h.sender_error(), ErrorKind::ProtocolViolation);
    assert_eq!(h.registry.state("t1"), Some(TaskState::Failed));
}

#[test]
fn test_receiver_rejects_mismatched_ack() {
    let mut h = Harness::new(plain(), plain());
    h.to_receiver = Box::new(|frame| {
        String::from_utf8(frame)
            .unwrap()
            .replacen("ack:100:", "ack:99:", 1)
            .into_bytes()
    });
    h.run(vanilla_task());

    assert_eq!(h.receiver_error(), ErrorKind::ProtocolViolation);
    // 发送端已经完成
    assert_eq!(h.sender_result, Some(Ok("t1".to_string())));
}

#[test]
fn test_version_outside_supported_range() {
    let sender = EngineConfig {
        min_version: 2,
        max_version: 3,
        ..plain()
    };
    let mut h = Harness::new(sender, plain());
    h.run(vanilla_task());

    assert_eq!(h.receiver_error(), ErrorKind::VersionUnsupported);
    assert_eq!(h.sender_error(), ErrorKind::VersionUnsupported);
    assert!(matches!(h.sender.state(), SenderState::Failed(_)));

    // 终态之后的任何消息都被忽略
    let late = h
        .sender
        .handle(SenderEvent::Frame(b"action:100:status?{\"type\":1}".to_vec()));
    assert!(late.is_empty());
    assert_eq!(h.sender_error(), ErrorKind::VersionUnsupported);
}

#[test]
fn test_negotiates_highest_common_version() {
    let sender = EngineConfig {
        min_version: 1,
        max_version: 3,
        ..plain()
    };
    let receiver = EngineConfig {
        min_version: 1,
        max_version: 2,
        ..plain()
    };
    let mut h = Harness::new(sender, receiver);
    h.run(vanilla_task());

    assert_eq!(h.sender_negotiated, Some((2, Negotiation::Disabled)));
    assert_eq!(h.receiver_negotiated, Some((2, Negotiation::Disabled)));
    assert_eq!(h.sender_result, Some(Ok("t1".to_string())));
}

#[test]
fn test_user_refusal() {
    let receiver = EngineConfig {
        auto_accept: false,
        ..plain()
    };
    let mut h = Harness::new(plain(), receiver);
    h.accept = false;
    h.run(vanilla_task());

    assert_eq!(h.sender_error(), ErrorKind::TransferRefused);
    assert_eq!(h.receiver_error(), ErrorKind::TransferRefused);
    assert_eq!(h.registry.state("t1"), Some(TaskState::Failed));
}

#[test]
fn test_manual_accept() {
    let receiver = EngineConfig {
        auto_accept: false,
        ..encrypted()
    };
    let mut h = Harness::new(encrypted(), receiver);
    h.run(vanilla_task());
    assert_eq!(h.receiver_result, Some(Ok("t1".to_string())));
    assert_eq!(h.registry.state("t1"), Some(TaskState::Completed));
}

#[test]
fn test_text_share() {
    let mut h = Harness::new(encrypted(), encrypted());
    let task = TransferTask::text("来自 Linux 的问候");
    let task_id = task.id.clone();
    h.run(task);

    assert_eq!(h.texts, vec!["来自 Linux 的问候".to_string()]);
    assert_eq!(h.sender_result, Some(Ok(task_id.clone())));
    assert_eq!(h.registry.state(&task_id), Some(TaskState::Completed));
}

#[test]
fn test_unknown_device_fails_credential_exchange() {
    let mut h = Harness::new(plain(), plain());
    let mut session = SenderSession::new(&plain(), Arc::new(P256AesGcm), h.registry.clone());
    session.handle(SenderEvent::Begin {
        task: vanilla_task(),
        network: P2pInfo::new("DIRECT-x".into(), "p".into(), "m".into(), 40123),
    });
    let intents = session.handle(SenderEvent::DeviceInfoUnavailable("Unknown device".into()));
    assert!(matches!(
        intents.last(),
        Some(SenderIntent::Finished(Err(SessionError {
            kind: ErrorKind::CredentialExchangeFailed,
            ..
        })))
    ));

    // 同一任务 ID 可以在新的会话里重新登记之前先被清理
    h.registry.evict("t1");
    h.run(vanilla_task());
    assert_eq!(h.sender_result, Some(Ok("t1".to_string())));
}

#[test]
fn test_abort_evicts_task() {
    let mut h = Harness::new(plain(), plain());
    h.sender.handle(SenderEvent::Begin {
        task: vanilla_task(),
        network: P2pInfo::new("DIRECT-x".into(), "p".into(), "m".into(), 40123),
    });
    assert_eq!(h.registry.state("t1"), Some(TaskState::Offered));

    let info = DeviceInfo::new("02:00:00:00:00:02".into(), None);
    h.sender
        .handle(SenderEvent::DeviceInfoRead(encode_device_info(&info)));

    let intents = h.sender.handle(SenderEvent::Abort);
    assert!(matches!(
        intents.last(),
        Some(SenderIntent::Finished(Err(SessionError {
            kind: ErrorKind::Aborted,
            ..
        })))
    ));
    assert_eq!(h.registry.state("t1"), None);

    let intents = h.receiver.handle(ReceiverEvent::Abort);
    assert!(matches!(
        h.receiver.state(),
        ReceiverState::Failed(SessionError {
            kind: ErrorKind::Aborted,
            ..
        })
    ));
    assert_eq!(intents.len(), 1);
}
