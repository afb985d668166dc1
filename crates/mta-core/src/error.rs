//! 会话级错误分类
//!
//! 所有错误都只终止单个会话 (进入 `Failed`)，不会影响进程本身，
//! 也不会在引擎内部自动重试。

use std::fmt;

use crate::codec::DecodeError;
use crate::crypto::CryptoError;
use crate::registry::RegistryError;

/// 会话失败原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    CredentialExchangeFailed,
    NetworkJoinFailed,
    HandshakeTimeout,
    VersionUnsupported,
    AuthenticationFailed,
    ProtocolViolation,
    StreamCorrupted,
    TaskNotFound,
    TaskAlreadyServing,
    /// 对端用户拒绝了传输
    TransferRefused,
    /// 外部调用方主动中止
    Aborted,
}

impl ErrorKind {
    pub fn name(&self) -> &'static str {
        match self {
            ErrorKind::CredentialExchangeFailed => "CredentialExchangeFailed",
            ErrorKind::NetworkJoinFailed => "NetworkJoinFailed",
            ErrorKind::HandshakeTimeout => "HandshakeTimeout",
            ErrorKind::VersionUnsupported => "VersionUnsupported",
            ErrorKind::AuthenticationFailed => "AuthenticationFailed",
            ErrorKind::ProtocolViolation => "ProtocolViolation",
            ErrorKind::StreamCorrupted => "StreamCorrupted",
            ErrorKind::TaskNotFound => "TaskNotFound",
            ErrorKind::TaskAlreadyServing => "TaskAlreadyServing",
            ErrorKind::TransferRefused => "TransferRefused",
            ErrorKind::Aborted => "Aborted",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 终止会话的错误：类型 + 可读描述
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {detail}")]
pub struct SessionError {
    pub kind: ErrorKind,
    pub detail: String,
}

impl SessionError {
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    pub fn violation(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::ProtocolViolation, detail)
    }
}

impl From<DecodeError> for SessionError {
    fn from(err: DecodeError) -> Self {
        Self::violation(err.to_string())
    }
}

impl From<CryptoError> for SessionError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::AuthenticationFailed => {
                Self::new(ErrorKind::AuthenticationFailed, err.to_string())
            }
            other => Self::violation(other.to_string()),
        }
    }
}

impl From<RegistryError> for SessionError {
    fn from(err: RegistryError) -> Self {
        let kind = match err {
            RegistryError::AlreadyServing(_) => ErrorKind::TaskAlreadyServing,
            _ => ErrorKind::TaskNotFound,
        };
        Self::new(kind, err.to_string())
    }
}
