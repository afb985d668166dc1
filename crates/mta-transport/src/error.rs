use mta_core::SessionError;

/// 传输层错误
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("TLS error: {0}")]
    Tls(#[from] native_tls::Error),

    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("radio error: {0}")]
    Radio(String),

    #[error("network error: {0}")]
    Network(String),

    /// 协议会话以失败结束
    #[error("session failed: {0}")]
    Session(#[from] SessionError),

    #[error("channel closed")]
    ChannelClosed,

    #[error("{0} timed out")]
    TimedOut(&'static str),
}

pub type Result<T> = std::result::Result<T, TransportError>;
