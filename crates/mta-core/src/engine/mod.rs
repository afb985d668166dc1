//! 协议状态机
//!
//! 两个角色各自一个同步状态机：`handle(event) -> Vec<intent>`。
//! 状态机不做 I/O，按返回顺序执行意图、并按到达顺序回送事件是调用方的责任。

mod link;
mod receiver;
mod sender;

pub use receiver::{ReceiverEvent, ReceiverIntent, ReceiverSession, ReceiverState};
pub use sender::{SenderEvent, SenderIntent, SenderSession, SenderState};

/// 会话角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Sender,
    Receiver,
}

impl Role {
    pub fn peer(self) -> Role {
        match self {
            Role::Sender => Role::Receiver,
            Role::Receiver => Role::Sender,
        }
    }

    /// 加密 nonce 的首字节，区分两个方向
    pub fn nonce_byte(self) -> u8 {
        match self {
            Role::Sender => b'S',
            Role::Receiver => b'R',
        }
    }

    /// 本端 action 的起始序号（接收端从 100 开始，避免与发送端混淆）
    pub fn first_sequence(self) -> u32 {
        match self {
            Role::Sender => 0,
            Role::Receiver => 100,
        }
    }
}
