use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit, Payload},
};
use hkdf::Hkdf;
use p256::{PublicKey, SecretKey, ecdh::diffie_hellman, elliptic_curve::sec1::ToEncodedPoint};
use rand::rngs::OsRng;
use sha2::Sha256;

use super::{CryptoError, CryptoProvider, KeyPair, NONCE_LEN, SharedKey};

const KDF_INFO: &[u8] = b"mta-handshake-v1";

/// 默认加密实现：P-256 ECDH + HKDF-SHA256 + AES-256-GCM
#[derive(Debug, Default, Clone, Copy)]
pub struct P256AesGcm;

impl CryptoProvider for P256AesGcm {
    fn generate_key_pair(&self) -> Result<KeyPair, CryptoError> {
        let secret = SecretKey::random(&mut OsRng);
        let public = secret.public_key().to_encoded_point(false);
        Ok(KeyPair::new(
            secret.to_bytes().to_vec(),
            public.as_bytes().to_vec(),
        ))
    }

    fn agree(&self, local: &KeyPair, peer_public: &[u8]) -> Result<SharedKey, CryptoError> {
        let secret = SecretKey::from_slice(local.secret_bytes())
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        let peer = PublicKey::from_sec1_bytes(peer_public)
            .map_err(|e| CryptoError::InvalidPublicValue(e.to_string()))?;

        let shared = diffie_hellman(secret.to_nonzero_scalar(), peer.as_affine());
        let hk = Hkdf::<Sha256>::new(None, shared.raw_secret_bytes().as_slice());

        let mut key = [0u8; 32];
        hk.expand(KDF_INFO, &mut key)
            .map_err(|_| CryptoError::KeyDerivation)?;
        Ok(SharedKey::new(key))
    }

    fn seal(
        &self,
        key: &SharedKey,
        nonce: &[u8; NONCE_LEN],
        aad: &[u8],
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        cipher
            .encrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|_| CryptoError::Encryption)
    }

    fn open(
        &self,
        key: &SharedKey,
        nonce: &[u8; NONCE_LEN],
        aad: &[u8],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad,
                },
            )
            .map_err(|_| CryptoError::AuthenticationFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agreement_is_symmetric() {
        let provider = P256AesGcm;
        let alice = provider.generate_key_pair().unwrap();
        let bob = provider.generate_key_pair().unwrap();

        assert_eq!(alice.public_value().len(), 65);
        assert_eq!(alice.public_value()[0], 0x04);

        let k1 = provider.agree(&alice, bob.public_value()).unwrap();
        let k2 = provider.agree(&bob, alice.public_value()).unwrap();
        assert_eq!(k1.as_bytes(), k2.as_bytes());
    }

    #[test]
    fn test_invalid_peer_value_rejected() {
        let provider = P256AesGcm;
        let alice = provider.generate_key_pair().unwrap();
        let err = provider.agree(&alice, &[0x04, 1, 2, 3]).err().unwrap();
        assert!(matches!(err, CryptoError::InvalidPublicValue(_)));
    }

    #[test]
    fn test_wrong_aad_fails_authentication() {
        let provider = P256AesGcm;
        let key = SharedKey::new([7u8; 32]);
        let nonce = [1u8; NONCE_LEN];

        let sealed = provider.seal(&key, &nonce, b"action:1:status", b"hi").unwrap();
        assert_eq!(
            provider.open(&key, &nonce, b"action:1:status", &sealed).unwrap(),
            b"hi"
        );
        assert_eq!(
            provider.open(&key, &nonce, b"action:2:status", &sealed),
            Err(CryptoError::AuthenticationFailed)
        );
    }
}
