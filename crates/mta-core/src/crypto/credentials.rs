//! 凭据加密（BLE 阶段）
//!
//! 与 CatShare 兼容：
//! 1. 共享密钥是原始 ECDH 输出（32 字节），不经过 KDF
//! 2. AES IV 是字符串 "0102030405060708" 的 ASCII 字节，不是十六进制

use aes::cipher::{KeyIvInit, StreamCipher};
use base64::{Engine as _, engine::general_purpose};
use p256::{
    PublicKey,
    ecdh::EphemeralSecret,
    pkcs8::{DecodePublicKey, EncodePublicKey},
};
use rand::rngs::OsRng;
use zeroize::Zeroizing;

use super::CryptoError;
use crate::codec::P2pInfo;

type Aes256Ctr = ctr::Ctr128BE<aes::Aes256>;

const AES_IV: &[u8; 16] = b"0102030405060708";

/// 本地 ECDH 密钥对，公钥以 Base64 SPKI 形式放进 DeviceInfo.key / P2pInfo.key
pub struct CredentialSecurity {
    secret: EphemeralSecret,
    public_key_b64: String,
}

/// 派生出的 AES-256-CTR 密钥
pub struct CredentialCipher {
    key: Zeroizing<[u8; 32]>,
}

impl CredentialSecurity {
    pub fn new() -> Result<Self, CryptoError> {
        let secret = EphemeralSecret::random(&mut OsRng);

        // Java ECPublicKey.getEncoded() 即 X.509 SubjectPublicKeyInfo
        let der = secret
            .public_key()
            .to_public_key_der()
            .map_err(|e| CryptoError::Encoding(e.to_string()))?;
        let public_key_b64 = general_purpose::STANDARD.encode(der.as_bytes());

        Ok(Self {
            secret,
            public_key_b64,
        })
    }

    pub fn public_key(&self) -> &str {
        &self.public_key_b64
    }

    /// 使用对方公钥派生凭据密钥
    pub fn derive_cipher(&self, peer_pub_key_b64: &str) -> Result<CredentialCipher, CryptoError> {
        let peer_public = parse_public_key(peer_pub_key_b64)?;
        let shared = self.secret.diffie_hellman(&peer_public);

        let mut key = Zeroizing::new([0u8; 32]);
        key.copy_from_slice(shared.raw_secret_bytes().as_slice());
        Ok(CredentialCipher { key })
    }
}

/// 接受 SEC1 uncompressed (65 字节) 或 SPKI DER
fn parse_public_key(b64: &str) -> Result<PublicKey, CryptoError> {
    let bytes = general_purpose::STANDARD
        .decode(b64.trim())
        .map_err(|e| CryptoError::InvalidPublicValue(e.to_string()))?;

    if bytes.len() == 65 && bytes[0] == 0x04 {
        PublicKey::from_sec1_bytes(&bytes)
            .map_err(|e| CryptoError::InvalidPublicValue(format!("SEC1: {e}")))
    } else {
        PublicKey::from_public_key_der(&bytes)
            .map_err(|e| CryptoError::InvalidPublicValue(format!("SPKI: {e}")))
    }
}

impl CredentialCipher {
    pub fn encrypt(&self, data: &str) -> Result<String, CryptoError> {
        let mut buffer = data.as_bytes().to_vec();
        self.apply(&mut buffer);
        Ok(general_purpose::STANDARD.encode(buffer))
    }

    pub fn decrypt(&self, encoded: &str) -> Result<String, CryptoError> {
        let mut buffer = general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| CryptoError::Encoding(e.to_string()))?;
        self.apply(&mut buffer);
        String::from_utf8(buffer).map_err(|e| CryptoError::Encoding(e.to_string()))
    }

    fn apply(&self, buffer: &mut [u8]) {
        let key: &[u8; 32] = &self.key;
        let mut cipher = Aes256Ctr::new(key.into(), AES_IV.into());
        cipher.apply_keystream(buffer);
    }

    /// 加密 ssid / psk / mac，附带发送端 ID 与公钥
    pub fn seal_p2p_info(
        &self,
        info: &P2pInfo,
        sender_id: &str,
        sender_public_key: &str,
    ) -> Result<P2pInfo, CryptoError> {
        Ok(P2pInfo::with_encryption(
            sender_id.to_string(),
            self.encrypt(&info.ssid)?,
            self.encrypt(&info.psk)?,
            self.encrypt(&info.mac)?,
            info.port,
            sender_public_key.to_string(),
        ))
    }

    pub fn open_p2p_info(&self, sealed: &P2pInfo) -> Result<P2pInfo, CryptoError> {
        Ok(P2pInfo {
            id: sealed.id.clone(),
            ssid: self.decrypt(&sealed.ssid)?,
            psk: self.decrypt(&sealed.psk)?,
            mac: self.decrypt(&sealed.mac)?,
            port: sealed.port,
            key: None,
            cat_share: sealed.cat_share,
        })
    }
}
