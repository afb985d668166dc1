//! MTA Transport
//!
//! 用 tokio 驱动 `mta-core` 的协议状态机:
//!
//! - **server**: 发送端的 `/websocket` + `/download` 服务 (axum)
//! - **sender** / **receiver**: 两端的完整工作流
//! - **archive**: ZIP 打包与解压
//! - **drivers**: BLE 与 WiFi P2P 的平台接口，**loopback** 为进程内实现

pub mod archive;
pub mod drivers;
pub mod error;
pub mod files;
pub mod loopback;
pub mod receiver;
pub mod sender;
pub mod server;

pub use archive::{ReceivedFile, build_archive, extract_archive};
pub use drivers::{NetworkHost, NetworkJoiner, RadioCentral, RadioPeripheral};
pub use error::{Result, TransportError};
pub use files::describe_paths;
pub use loopback::{LoopbackNetwork, LoopbackRadio};
pub use receiver::{
    ReceiveEvent, ReceiveOptions, ReceiveOutcome, ReceiveProgressCallback, Receiver,
    SimpleReceiveCallback,
};
pub use sender::{SendEvent, SendOptions, SendProgressCallback, Sender, SimpleSendCallback};
pub use server::{ServerEvent, TransferServer};
