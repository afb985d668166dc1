//! 消息关联层：序号分配、ack 匹配、载荷加解密
//!
//! 每个 action 必须先收到对应 ack（相同序号与动作）才能发出下一个 action。

use serde::de::DeserializeOwned;
use serde_json::Value;

use super::Role;
use crate::codec::{self, Action, DecodeError, MessageKind, Payload, ProtocolMessage};
use crate::crypto::SessionCryptoContext;
use crate::error::SessionError;

/// 已校验、已解密的入站消息
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Inbound {
    Action {
        sequence: u32,
        action: Action,
        body: Option<Value>,
    },
    Ack {
        action: Action,
        body: Option<Value>,
    },
}

#[derive(Debug)]
pub(crate) struct Link {
    next_sequence: u32,
    pending: Option<(u32, Action)>,
    last_peer_sequence: Option<u32>,
    crypto: Option<SessionCryptoContext>,
}

impl Link {
    pub fn new(role: Role) -> Self {
        Self {
            next_sequence: role.first_sequence(),
            pending: None,
            last_peer_sequence: None,
            crypto: None,
        }
    }

    pub fn install_crypto(&mut self, ctx: SessionCryptoContext) {
        self.crypto = Some(ctx);
    }

    pub fn crypto_mut(&mut self) -> Option<&mut SessionCryptoContext> {
        self.crypto.as_mut()
    }

    pub fn is_sealed(&self) -> bool {
        self.crypto
            .as_ref()
            .is_some_and(SessionCryptoContext::is_established)
    }

    /// 正在等待 ack 的动作
    pub fn awaiting(&self) -> Option<Action> {
        self.pending.map(|(_, action)| action)
    }

    /// 发出 action，登记为待确认
    pub fn action(&mut self, action: Action, body: Option<Value>) -> Result<Vec<u8>, SessionError> {
        if let Some((seq, pending)) = self.pending {
            return Err(SessionError::violation(format!(
                "cannot send {action} while {pending} #{seq} is unacknowledged"
            )));
        }

        let sequence = self.next_sequence;
        self.next_sequence = sequence
            .checked_add(1)
            .ok_or_else(|| SessionError::violation("sequence space exhausted"))?;

        let mut message = ProtocolMessage::action(sequence, action, Payload::Empty);
        message.payload = self.seal(&message, body)?;
        self.pending = Some((sequence, action));
        Ok(codec::encode(&message))
    }

    /// 对收到的 action 回 ack
    pub fn ack(
        &mut self,
        sequence: u32,
        action: Action,
        body: Option<Value>,
    ) -> Result<Vec<u8>, SessionError> {
        let mut message = ProtocolMessage::ack(sequence, action, Payload::Empty);
        message.payload = self.seal(&message, body)?;
        Ok(codec::encode(&message))
    }

    pub fn receive(&mut self, bytes: &[u8]) -> Result<Inbound, SessionError> {
        let message = codec::decode(bytes)?;

        match message.kind {
            MessageKind::Ack => {
                let (sequence, action) = self.pending.ok_or(DecodeError::UnexpectedRole {
                    sequence: message.sequence,
                    action: message.action,
                })?;
                if sequence != message.sequence || action != message.action {
                    return Err(SessionError::violation(format!(
                        "ack {} does not match pending {}:{}",
                        message.header(),
                        sequence,
                        action
                    )));
                }
                let body = self.open(&message)?;
                self.pending = None;
                Ok(Inbound::Ack { action, body })
            }
            MessageKind::Action => {
                if self
                    .last_peer_sequence
                    .is_some_and(|last| message.sequence <= last)
                {
                    return Err(SessionError::violation(format!(
                        "action sequence {} is not increasing",
                        message.sequence
                    )));
                }
                let body = self.open(&message)?;
                self.last_peer_sequence = Some(message.sequence);
                Ok(Inbound::Action {
                    sequence: message.sequence,
                    action: message.action,
                    body,
                })
            }
        }
    }

    /// 丢弃所有密钥材料
    pub fn discard_crypto(&mut self) {
        if let Some(mut ctx) = self.crypto.take() {
            ctx.zeroize();
        }
    }

    // versionNegotiation 始终明文：公钥交换本身就在其中
    fn seal(
        &mut self,
        message: &ProtocolMessage,
        body: Option<Value>,
    ) -> Result<Payload, SessionError> {
        let Some(body) = body else {
            return Ok(Payload::Empty);
        };
        match self.crypto.as_mut() {
            Some(ctx) if ctx.is_established() && message.action != Action::VersionNegotiation => {
                let plaintext = serde_json::to_vec(&body)
                    .map_err(|e| SessionError::violation(format!("unencodable body: {e}")))?;
                let sealed = ctx.encrypt(message.sequence, message.header().as_bytes(), &plaintext)?;
                Ok(Payload::Sealed(sealed))
            }
            _ => Ok(Payload::Json(body)),
        }
    }

    fn open(&mut self, message: &ProtocolMessage) -> Result<Option<Value>, SessionError> {
        let sealed = self.is_sealed();
        match &message.payload {
            Payload::Empty => Ok(None),
            Payload::Json(value) => {
                if sealed && message.action != Action::VersionNegotiation {
                    return Err(SessionError::violation(format!(
                        "plaintext {} after encryption was negotiated",
                        message.header()
                    )));
                }
                Ok(Some(value.clone()))
            }
            Payload::Sealed(ciphertext) => {
                let ctx = match self.crypto.as_mut() {
                    Some(ctx) if ctx.is_established() => ctx,
                    _ => {
                        return Err(SessionError::violation(format!(
                            "sealed {} without a negotiated key",
                            message.header()
                        )));
                    }
                };
                let plaintext =
                    ctx.decrypt(message.sequence, message.header().as_bytes(), ciphertext)?;
                let value = serde_json::from_slice(&plaintext)
                    .map_err(|e| SessionError::violation(format!("sealed body is not JSON: {e}")))?;
                Ok(Some(value))
            }
        }
    }
}

/// 把消息体解析为具体载荷类型
pub(crate) fn parse_body<T: DeserializeOwned>(
    action: Action,
    body: Option<Value>,
) -> Result<T, SessionError> {
    let body = body.ok_or_else(|| SessionError::violation(format!("{action} without payload")))?;
    serde_json::from_value(body)
        .map_err(|e| SessionError::violation(format!("invalid {action} payload: {e}")))
}
