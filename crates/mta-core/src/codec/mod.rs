//! 互传联盟协议握手消息格式
//!
//! 消息格式: `type:id:name?payload`
//! - type: "action" 或 "ack"
//! - id: 消息序号 (数字)
//! - name: 动作名称
//! - payload: 可选载荷；JSON 原文，或 `!` + Base64 密文（会话加密开启后）
//!
//! 编解码器无状态、无副作用。

mod attributes;
mod payload;

pub use attributes::{
    ADV_SERVICE_UUID, CAP_5GHZ, CAP_ENCRYPTION, DeviceInfo, MAIN_SERVICE_UUID, P2P_CHAR_UUID,
    P2pInfo, STATUS_CHAR_UUID, decode_device_info, decode_p2p_info, encode_device_info,
    encode_p2p_info,
};
pub use payload::{FileSummary, SendRequest, StatusOutcome, StatusReport, VersionOffer};

use base64::{Engine as _, engine::general_purpose};
use regex::Regex;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

static MSG_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^(\w+):(\d+):(\w+)(\?(.*))?$").expect("message pattern is valid")
});

/// 密文载荷的前缀字符（JSON 不会以它开头）
const SEALED_MARKER: char = '!';

/// 解码错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    #[error("unexpected {action} ack #{sequence}: no matching action was sent")]
    UnexpectedRole { sequence: u32, action: Action },
}

/// 握手动作（固定的小枚举）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    VersionNegotiation = 0,
    SendRequest = 1,
    Status = 99,
}

impl Action {
    pub fn code(self) -> u16 {
        self as u16
    }

    pub fn name(self) -> &'static str {
        match self {
            Action::VersionNegotiation => "versionNegotiation",
            Action::SendRequest => "sendRequest",
            Action::Status => "status",
        }
    }

    /// 按名称匹配（不区分大小写，部分厂商实现大小写不一致）
    pub fn from_name(name: &str) -> Option<Self> {
        [Action::VersionNegotiation, Action::SendRequest, Action::Status]
            .into_iter()
            .find(|action| action.name().eq_ignore_ascii_case(name))
    }

    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            0 => Some(Action::VersionNegotiation),
            1 => Some(Action::SendRequest),
            99 => Some(Action::Status),
            _ => None,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 消息角色：动作或确认
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Action,
    Ack,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Action => "action",
            MessageKind::Ack => "ack",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 消息载荷
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Empty,
    Json(Value),
    /// AES-GCM 密文 + 认证标签
    Sealed(Vec<u8>),
}

impl Payload {
    pub fn is_empty(&self) -> bool {
        matches!(self, Payload::Empty)
    }
}

/// 握手消息
#[derive(Debug, Clone, PartialEq)]
pub struct ProtocolMessage {
    pub sequence: u32,
    pub action: Action,
    pub kind: MessageKind,
    pub payload: Payload,
}

impl ProtocolMessage {
    /// 创建 action 消息
    pub fn action(sequence: u32, action: Action, payload: Payload) -> Self {
        Self {
            sequence,
            action,
            kind: MessageKind::Action,
            payload,
        }
    }

    /// 创建 ack 响应消息
    pub fn ack(sequence: u32, action: Action, payload: Payload) -> Self {
        Self {
            sequence,
            action,
            kind: MessageKind::Ack,
            payload,
        }
    }

    /// 针对本消息生成确认（相同序号与动作）
    pub fn make_ack(&self, payload: Payload) -> Self {
        Self::ack(self.sequence, self.action, payload)
    }

    /// 用于 AEAD 附加数据的头部文本
    pub fn header(&self) -> String {
        format!("{}:{}:{}", self.kind, self.sequence, self.action)
    }
}

impl fmt::Display for ProtocolMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.kind, self.sequence, self.action)?;
        match &self.payload {
            Payload::Empty => Ok(()),
            Payload::Json(value) => write!(f, "?{value}"),
            Payload::Sealed(bytes) => write!(
                f,
                "?{SEALED_MARKER}{}",
                general_purpose::STANDARD.encode(bytes)
            ),
        }
    }
}

impl FromStr for ProtocolMessage {
    type Err = DecodeError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let malformed = |reason: &str| DecodeError::MalformedMessage(format!("{reason}: {text:?}"));

        let caps = MSG_PATTERN
            .captures(text)
            .ok_or_else(|| malformed("bad layout"))?;

        let kind = match &caps[1] {
            "action" => MessageKind::Action,
            "ack" => MessageKind::Ack,
            _ => return Err(malformed("unknown message type")),
        };
        let sequence: u32 = caps[2]
            .parse()
            .map_err(|_| malformed("sequence out of range"))?;
        let action = Action::from_name(&caps[3]).ok_or_else(|| malformed("unknown action"))?;

        let payload = match caps.get(5).map(|m| m.as_str()) {
            None | Some("") => Payload::Empty,
            Some(raw) => match raw.strip_prefix(SEALED_MARKER) {
                Some(b64) => Payload::Sealed(
                    general_purpose::STANDARD
                        .decode(b64)
                        .map_err(|_| malformed("sealed payload is not base64"))?,
                ),
                None => Payload::Json(
                    serde_json::from_str(raw).map_err(|_| malformed("payload is not JSON"))?,
                ),
            },
        };

        Ok(Self {
            sequence,
            action,
            kind,
            payload,
        })
    }
}

/// 编码为传输字节（UTF-8 文本帧）
pub fn encode(message: &ProtocolMessage) -> Vec<u8> {
    message.to_string().into_bytes()
}

/// 从传输字节解码
pub fn decode(bytes: &[u8]) -> Result<ProtocolMessage, DecodeError> {
    let text = std::str::from_utf8(bytes)
        .map_err(|_| DecodeError::MalformedMessage("frame is not valid UTF-8".into()))?;
    text.parse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_parse_action() {
        let msg = decode(b"action:1:sendRequest?{\"taskId\":\"123\"}").unwrap();
        assert_eq!(msg.kind, MessageKind::Action);
        assert_eq!(msg.sequence, 1);
        assert_eq!(msg.action, Action::SendRequest);
        assert_eq!(msg.payload, Payload::Json(json!({"taskId": "123"})));
    }

    #[test]
    fn test_parse_ack_without_payload() {
        let msg = decode(b"ack:0:versionNegotiation").unwrap();
        assert_eq!(msg.kind, MessageKind::Ack);
        assert_eq!(msg.sequence, 0);
        assert_eq!(msg.action, Action::VersionNegotiation);
        assert!(msg.payload.is_empty());
    }

    #[test]
    fn test_action_name_is_case_insensitive() {
        let msg = decode(b"action:7:STATUS").unwrap();
        assert_eq!(msg.action, Action::Status);
        assert_eq!(Action::from_code(99), Some(Action::Status));
        assert_eq!(Action::Status.code(), 99);
    }

    #[test]
    fn test_to_string() {
        let msg = ProtocolMessage::action(
            0,
            Action::VersionNegotiation,
            Payload::Json(json!({"version": 1})),
        );
        assert_eq!(msg.to_string(), "action:0:versionNegotiation?{\"version\":1}");
    }

    #[test]
    fn test_sealed_payload_uses_marker() {
        let msg = ProtocolMessage::ack(3, Action::Status, Payload::Sealed(vec![1, 2, 3]));
        let text = msg.to_string();
        assert_eq!(text, "ack:3:status?!AQID");
        assert_eq!(decode(text.as_bytes()).unwrap(), msg);
    }

    #[test]
    fn test_malformed_inputs() {
        let cases: [&[u8]; 7] = [
            b"",
            b"action:1",
            b"action::status",
            b"notify:1:status",
            b"action:1:cancelEverything",
            b"action:99999999999:status",
            b"action:1:status?{not json",
        ];
        for case in cases {
            assert!(
                matches!(decode(case), Err(DecodeError::MalformedMessage(_))),
                "expected malformed: {:?}",
                String::from_utf8_lossy(case)
            );
        }
        assert!(matches!(
            decode(&[0xff, 0xfe]),
            Err(DecodeError::MalformedMessage(_))
        ));
    }

    #[test]
    fn test_make_ack_mirrors_sequence_and_action() {
        let msg = ProtocolMessage::action(42, Action::Status, Payload::Empty);
        let ack = msg.make_ack(Payload::Empty);
        assert_eq!(ack.kind, MessageKind::Ack);
        assert_eq!(ack.sequence, 42);
        assert_eq!(ack.action, Action::Status);
        assert_eq!(ack.header(), "ack:42:status");
    }

    fn arb_message() -> impl Strategy<Value = ProtocolMessage> {
        let action = prop_oneof![
            Just(Action::VersionNegotiation),
            Just(Action::SendRequest),
            Just(Action::Status),
        ];
        let kind = prop_oneof![Just(MessageKind::Action), Just(MessageKind::Ack)];
        let payload = prop_oneof![
            Just(Payload::Empty),
            ("[a-zA-Z0-9 ?:!]{0,16}", any::<u32>())
                .prop_map(|(s, n)| Payload::Json(json!({ "reason": s, "type": n }))),
            proptest::collection::vec(any::<u8>(), 0..48).prop_map(Payload::Sealed),
        ];
        (any::<u32>(), action, kind, payload).prop_map(|(sequence, action, kind, payload)| {
            ProtocolMessage {
                sequence,
                action,
                kind,
                payload,
            }
        })
    }

    proptest! {
        #[test]
        fn prop_decode_inverts_encode(msg in arb_message()) {
            prop_assert_eq!(decode(&encode(&msg)).unwrap(), msg);
        }
    }
}
