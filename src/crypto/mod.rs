//! AES-256-GCM authenticated encryption with PBKDF2-HMAC-SHA256 key
//! derivation, protecting message content at rest and in transit.
//!
//! Wire format matches `/api/v1/encrypt` and `/api/v1/decrypt`: three
//! base64 fields — `ciphertext` (salt prepended to the GCM ciphertext,
//! tag stripped off), `nonce`, and `tag`. A fresh salt and nonce are
//! drawn for every call to `encrypt`, so encrypting the same plaintext
//! twice never produces the same output. The key is derived from a
//! single system-wide master secret (`ENCRYPTION_KEY`), not a per-call
//! passphrase — every message shares the same derivation input, only
//! the salt varies.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

pub const NONCE_SIZE: usize = 12;
pub const KEY_SIZE: usize = 32;
pub const SALT_SIZE: usize = 16;
pub const TAG_SIZE: usize = 16;
pub const PBKDF2_ITERATIONS: u32 = 100_000;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("field is not valid base64: {0}")]
    Encoding(#[from] base64::DecodeError),

    #[error("ciphertext is too short to contain a salt")]
    Truncated,

    #[error("message authentication failed")]
    AuthFailed,

    #[error("decrypted content is not valid UTF-8")]
    InvalidUtf8,
}

/// The three base64 fields exchanged over the wire for an encrypted
/// message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedPayload {
    pub ciphertext: String,
    pub nonce: String,
    pub tag: String,
}

/// AES-256-GCM engine keyed by a single master secret shared across
/// every call. Holds no per-message state; salt and nonce are drawn
/// fresh on every `encrypt`.
#[derive(Debug, Clone)]
pub struct CryptoEngine {
    master_key: Vec<u8>,
}

impl CryptoEngine {
    pub fn new(master_key: impl Into<String>) -> Self {
        Self {
            master_key: master_key.into().into_bytes(),
        }
    }

    fn derive_key(&self, salt: &[u8]) -> [u8; KEY_SIZE] {
        let mut key = [0u8; KEY_SIZE];
        pbkdf2_hmac::<Sha256>(&self.master_key, salt, PBKDF2_ITERATIONS, &mut key);
        key
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<EncryptedPayload, CryptoError> {
        let mut salt = [0u8; SALT_SIZE];
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut salt);
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);

        let key_bytes = self.derive_key(&salt);
        let key = Key::<Aes256Gcm>::from_slice(&key_bytes);
        let cipher = Aes256Gcm::new(key);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext_with_tag = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| CryptoError::AuthFailed)?;
        let split_at = ciphertext_with_tag.len() - TAG_SIZE;
        let (ciphertext, tag) = ciphertext_with_tag.split_at(split_at);

        let mut ciphertext_with_salt = Vec::with_capacity(SALT_SIZE + ciphertext.len());
        ciphertext_with_salt.extend_from_slice(&salt);
        ciphertext_with_salt.extend_from_slice(ciphertext);

        Ok(EncryptedPayload {
            ciphertext: BASE64.encode(ciphertext_with_salt),
            nonce: BASE64.encode(nonce_bytes),
            tag: BASE64.encode(tag),
        })
    }

    pub fn decrypt(&self, payload: &EncryptedPayload) -> Result<String, CryptoError> {
        let ciphertext_with_salt = BASE64.decode(&payload.ciphertext)?;
        let nonce_bytes = BASE64.decode(&payload.nonce)?;
        let tag_bytes = BASE64.decode(&payload.tag)?;

        if ciphertext_with_salt.len() < SALT_SIZE {
            return Err(CryptoError::Truncated);
        }
        let (salt, ciphertext) = ciphertext_with_salt.split_at(SALT_SIZE);

        let key_bytes = self.derive_key(salt);
        let key = Key::<Aes256Gcm>::from_slice(&key_bytes);
        let cipher = Aes256Gcm::new(key);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let mut ciphertext_with_tag = Vec::with_capacity(ciphertext.len() + tag_bytes.len());
        ciphertext_with_tag.extend_from_slice(ciphertext);
        ciphertext_with_tag.extend_from_slice(&tag_bytes);

        let plaintext = cipher
            .decrypt(nonce, ciphertext_with_tag.as_ref())
            .map_err(|_| CryptoError::AuthFailed)?;

        String::from_utf8(plaintext).map_err(|_| CryptoError::InvalidUtf8)
    }

    /// Returns whether `payload` decrypts cleanly, without exposing
    /// the recovered plaintext.
    pub fn verify(&self, payload: &EncryptedPayload) -> bool {
        self.decrypt(payload).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> CryptoEngine {
        CryptoEngine::new("correct horse battery staple")
    }

    #[test]
    fn roundtrip_recovers_plaintext() {
        let engine = engine();
        let payload = engine.encrypt("OPERATION DAWN BLADE").unwrap();
        let recovered = engine.decrypt(&payload).unwrap();
        assert_eq!(recovered, "OPERATION DAWN BLADE");
    }

    #[test]
    fn encrypting_twice_yields_distinct_payloads() {
        let engine = engine();
        let a = engine.encrypt("same content").unwrap();
        let b = engine.encrypt("same content").unwrap();
        assert_ne!(a.ciphertext, b.ciphertext);
        assert_ne!(a.nonce, b.nonce);
    }

    #[test]
    fn wrong_master_key_fails_closed() {
        let payload = engine().encrypt("secret").unwrap();
        let other = CryptoEngine::new("a different key entirely");
        assert!(other.decrypt(&payload).is_err());
        assert!(!other.verify(&payload));
    }

    #[test]
    fn tampered_tag_is_rejected() {
        let engine = engine();
        let mut payload = engine.encrypt("payload").unwrap();
        let mut tag_bytes = BASE64.decode(&payload.tag).unwrap();
        tag_bytes[0] ^= 0xFF;
        payload.tag = BASE64.encode(tag_bytes);
        assert!(matches!(engine.decrypt(&payload), Err(CryptoError::AuthFailed)));
    }

    #[test]
    fn truncated_ciphertext_is_rejected() {
        let engine = engine();
        let payload = EncryptedPayload {
            ciphertext: BASE64.encode([0u8; 4]),
            nonce: BASE64.encode([0u8; NONCE_SIZE]),
            tag: BASE64.encode([0u8; TAG_SIZE]),
        };
        assert!(matches!(engine.decrypt(&payload), Err(CryptoError::Truncated)));
    }
}
