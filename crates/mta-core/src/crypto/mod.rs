//! MTA Crypto Module
//!
//! 两层加密：
//! - **会话加密** ([`SessionCryptoContext`]): 版本协商时交换临时公钥，
//!   ECDH (P-256) + HKDF-SHA256 派生密钥，AES-256-GCM 封装握手载荷
//! - **凭据加密** ([`CredentialSecurity`]): 与 CatShare 兼容的 P2pInfo 加密，
//!   原始 ECDH 共享密钥 + AES-256-CTR（固定 IV）
//!
//! 会话加密的原语通过 [`CryptoProvider`] 注入，默认实现为 [`P256AesGcm`]。

mod credentials;
mod provider;
mod session;

pub use credentials::{CredentialCipher, CredentialSecurity};
pub use provider::P256AesGcm;
pub use session::SessionCryptoContext;

use zeroize::Zeroizing;

/// AEAD nonce 长度
pub const NONCE_LEN: usize = 12;

/// 加密错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CryptoError {
    #[error("invalid peer public value: {0}")]
    InvalidPublicValue(String),

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("key derivation failed")]
    KeyDerivation,

    #[error("encryption failed")]
    Encryption,

    /// 认证标签不匹配：篡改或密钥不一致，会话必须终止
    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("session key has not been derived")]
    NotEstablished,

    #[error("encoding error: {0}")]
    Encoding(String),
}

/// 加密协商结果
///
/// 对端不支持加密不是错误，只是协商结果为 `Disabled`。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Negotiation {
    Enabled,
    Disabled,
}

impl Negotiation {
    pub fn is_enabled(self) -> bool {
        self == Negotiation::Enabled
    }
}

/// 双方都声明支持时才启用加密
pub fn negotiate(local_capability: bool, peer_capability: bool) -> Negotiation {
    if local_capability && peer_capability {
        Negotiation::Enabled
    } else {
        Negotiation::Disabled
    }
}

/// 临时密钥对；私钥部分在释放时清零
pub struct KeyPair {
    secret: Zeroizing<Vec<u8>>,
    public: Vec<u8>,
}

impl KeyPair {
    pub fn new(secret: Vec<u8>, public: Vec<u8>) -> Self {
        Self {
            secret: Zeroizing::new(secret),
            public,
        }
    }

    pub fn public_value(&self) -> &[u8] {
        &self.public
    }

    pub fn secret_bytes(&self) -> &[u8] {
        &self.secret
    }
}

/// 派生出的 256 位对称密钥
pub struct SharedKey(Zeroizing<[u8; 32]>);

impl SharedKey {
    pub fn new(key: [u8; 32]) -> Self {
        Self(Zeroizing::new(key))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// 加密原语提供者
///
/// 协议核心只依赖这个接口；不同平台可以注入自己的实现。
pub trait CryptoProvider: Send + Sync {
    /// 生成临时密钥对
    fn generate_key_pair(&self) -> Result<KeyPair, CryptoError>;

    /// 密钥协商：本地私钥 + 对端公钥 → 对称密钥
    fn agree(&self, local: &KeyPair, peer_public: &[u8]) -> Result<SharedKey, CryptoError>;

    /// 认证加密
    fn seal(
        &self,
        key: &SharedKey,
        nonce: &[u8; NONCE_LEN],
        aad: &[u8],
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CryptoError>;

    /// 认证解密；标签不匹配时返回 [`CryptoError::AuthenticationFailed`]
    fn open(
        &self,
        key: &SharedKey,
        nonce: &[u8; NONCE_LEN],
        aad: &[u8],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, CryptoError>;
}
