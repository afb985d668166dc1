//! MTA Core Library
//!
//! 互传联盟 (MTA) 协议引擎，与 CatShare (Android) 兼容。
//!
//! 本 crate 不做任何网络 I/O：状态机只接收事件、返回意图 (intent)，
//! 由外层传输代码 (`mta-transport`) 负责真正的 BLE / WiFi / WebSocket / HTTP 操作。
//!
//! # 模块
//!
//! - **codec**: 握手消息 `type:id:name?payload` 编解码，以及 DeviceInfo / P2pInfo 载荷
//! - **crypto**: 会话加密 (ECDH + AES-GCM) 与凭据加密 (ECDH + AES-CTR)
//! - **engine**: 发送端 / 接收端协议状态机
//! - **registry**: 传输任务登记表 (发送端与下载服务共享)
//! - **config**: 引擎配置
//!
//! # 使用示例
//!
//! ```ignore
//! use mta_core::engine::{SenderEvent, SenderIntent, SenderSession};
//!
//! let mut session = SenderSession::new(&config, provider, registry);
//! for intent in session.handle(SenderEvent::Begin { task, network }) {
//!     match intent {
//!         SenderIntent::ReadDeviceInfo => { /* 读取 STATUS 特征 */ }
//!         SenderIntent::Send(frame) => { /* 写入 WebSocket */ }
//!         _ => {}
//!     }
//! }
//! ```

pub mod codec;
pub mod config;
pub mod crypto;
pub mod engine;
pub mod error;
pub mod registry;

// Codec re-exports
pub use codec::{
    Action, DecodeError, DeviceInfo, MessageKind, P2pInfo, Payload, ProtocolMessage, SendRequest,
    StatusOutcome, StatusReport, VersionOffer,
};

// Config re-exports
pub use config::{BrandId, ConfigError, EngineConfig};

// Crypto re-exports
pub use crypto::{
    CredentialCipher, CredentialSecurity, CryptoError, CryptoProvider, Negotiation, P256AesGcm,
    SessionCryptoContext,
};

// Engine re-exports
pub use engine::{
    ReceiverEvent, ReceiverIntent, ReceiverSession, ReceiverState, Role, SenderEvent,
    SenderIntent, SenderSession, SenderState,
};

pub use error::{ErrorKind, SessionError};

// Registry re-exports
pub use registry::{
    ContentRef, FileDescriptor, RegistryError, ServeGrant, TaskId, TaskOutcome, TaskRegistry,
    TaskState, TransferTask,
};
