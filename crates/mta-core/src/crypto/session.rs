//! 单个握手会话的加密上下文
//!
//! nonce = 发出方角色字节 (4) ‖ 消息序号 (4, BE) ‖ 方向计数器 (4, BE)。
//! 每个方向独立计数，重放或乱序的密文无法通过认证。

use std::fmt;
use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose};

use super::{CryptoError, CryptoProvider, KeyPair, NONCE_LEN, SharedKey};
use crate::engine::Role;

pub struct SessionCryptoContext {
    provider: Arc<dyn CryptoProvider>,
    role: Role,
    key_pair: Option<KeyPair>,
    shared: Option<SharedKey>,
    sent: u32,
    received: u32,
}

impl SessionCryptoContext {
    /// 生成本会话的临时密钥对
    pub fn new(provider: Arc<dyn CryptoProvider>, role: Role) -> Result<Self, CryptoError> {
        let key_pair = provider.generate_key_pair()?;
        Ok(Self {
            provider,
            role,
            key_pair: Some(key_pair),
            shared: None,
            sent: 0,
            received: 0,
        })
    }

    /// 本地临时公钥；密钥派生后不再可用
    pub fn public_value(&self) -> Option<&[u8]> {
        self.key_pair.as_ref().map(KeyPair::public_value)
    }

    pub fn public_value_b64(&self) -> Option<String> {
        self.public_value()
            .map(|v| general_purpose::STANDARD.encode(v))
    }

    /// 与对端公钥协商会话密钥，临时私钥随即销毁
    pub fn derive_key(&mut self, peer_public: &[u8]) -> Result<(), CryptoError> {
        let key_pair = self
            .key_pair
            .take()
            .ok_or_else(|| CryptoError::InvalidKey("ephemeral key already consumed".into()))?;
        self.shared = Some(self.provider.agree(&key_pair, peer_public)?);
        Ok(())
    }

    pub fn derive_key_b64(&mut self, peer_public_b64: &str) -> Result<(), CryptoError> {
        let peer = general_purpose::STANDARD
            .decode(peer_public_b64)
            .map_err(|e| CryptoError::InvalidPublicValue(e.to_string()))?;
        self.derive_key(&peer)
    }

    pub fn is_established(&self) -> bool {
        self.shared.is_some()
    }

    pub fn encrypt(
        &mut self,
        sequence: u32,
        aad: &[u8],
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let key = self.shared.as_ref().ok_or(CryptoError::NotEstablished)?;
        let next = self.sent.checked_add(1).ok_or(CryptoError::Encryption)?;
        let nonce = build_nonce(self.role, sequence, self.sent);
        let sealed = self.provider.seal(key, &nonce, aad, plaintext)?;
        self.sent = next;
        Ok(sealed)
    }

    /// 失败时计数器不前进
    pub fn decrypt(
        &mut self,
        sequence: u32,
        aad: &[u8],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let key = self.shared.as_ref().ok_or(CryptoError::NotEstablished)?;
        let nonce = build_nonce(self.role.peer(), sequence, self.received);
        let plaintext = self.provider.open(key, &nonce, aad, ciphertext)?;
        self.received = self.received.wrapping_add(1);
        Ok(plaintext)
    }

    /// 销毁所有密钥材料
    pub fn zeroize(&mut self) {
        self.key_pair = None;
        self.shared = None;
    }

    pub fn counters(&self) -> (u32, u32) {
        (self.sent, self.received)
    }
}

impl fmt::Debug for SessionCryptoContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCryptoContext")
            .field("role", &self.role)
            .field("established", &self.is_established())
            .field("sent", &self.sent)
            .field("received", &self.received)
            .finish_non_exhaustive()
    }
}

fn build_nonce(origin: Role, sequence: u32, counter: u32) -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    nonce[0] = origin.nonce_byte();
    nonce[4..8].copy_from_slice(&sequence.to_be_bytes());
    nonce[8..12].copy_from_slice(&counter.to_be_bytes());
    nonce
}
