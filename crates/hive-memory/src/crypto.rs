//! Symmetric payload encryption for file-backed stores.
//!
//! The construction key is hashed into the cipher key, so callers may pass
//! arbitrary key material. The key is never logged and never appears in
//! debug output. Ciphertext layout: 24-byte XChaCha20 nonce followed by the
//! sealed payload.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use hive_core::{HiveError, HiveResult};
use rand::RngCore;
use sha2::{Digest, Sha256};

const NONCE_LEN: usize = 24;

/// Symmetric cipher for store payloads
#[derive(Clone)]
pub struct PayloadCipher {
    key: [u8; 32],
}

impl PayloadCipher {
    pub fn new(key_material: &[u8]) -> Self {
        let digest = Sha256::digest(key_material);
        let mut key = [0u8; 32];
        key.copy_from_slice(&digest);
        Self { key }
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> HiveResult<Vec<u8>> {
        let cipher = XChaCha20Poly1305::new((&self.key).into());
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = XNonce::from_slice(&nonce_bytes);
        let sealed = cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| HiveError::memory("failed to encrypt store payload"))?;
        let mut out = nonce_bytes.to_vec();
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    pub fn decrypt(&self, payload: &[u8]) -> HiveResult<Vec<u8>> {
        if payload.len() < NONCE_LEN {
            return Err(HiveError::corruption(
                "encrypted-store",
                "payload shorter than nonce",
            ));
        }
        let cipher = XChaCha20Poly1305::new((&self.key).into());
        let nonce = XNonce::from_slice(&payload[..NONCE_LEN]);
        cipher
            .decrypt(nonce, &payload[NONCE_LEN..])
            .map_err(|_| HiveError::corruption("encrypted-store", "payload failed to decrypt"))
    }
}

impl std::fmt::Debug for PayloadCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PayloadCipher { key: <redacted> }")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let cipher = PayloadCipher::new(b"store key");
        let sealed = cipher.encrypt(b"payload").unwrap();
        assert_ne!(&sealed[NONCE_LEN..], b"payload");
        assert_eq!(cipher.decrypt(&sealed).unwrap(), b"payload");
    }

    #[test]
    fn wrong_key_is_corruption() {
        let sealed = PayloadCipher::new(b"right").encrypt(b"payload").unwrap();
        let err = PayloadCipher::new(b"wrong").decrypt(&sealed).unwrap_err();
        assert_eq!(err.error_code(), "MEMORY_CORRUPTION");
    }

    #[test]
    fn truncated_payload_is_corruption() {
        let cipher = PayloadCipher::new(b"key");
        assert!(cipher.decrypt(&[0u8; 4]).is_err());
    }
}
