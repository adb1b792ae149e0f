//! At-rest encryption of inventory secrets with AES-256-GCM.
//!
//! Format: base64(nonce_12bytes || ciphertext || tag_16bytes)

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::Engine;
use thiserror::Error;
use zeroize::Zeroize;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
pub const KEY_LEN: usize = 32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("encryption key must be {KEY_LEN} bytes, got {0}")]
    KeyLength(usize),
    #[error("encryption key is not valid base64")]
    KeyEncoding,
    #[error("ciphertext is not valid base64")]
    InvalidEncoding,
    #[error("ciphertext too short")]
    TooShort,
    #[error("encryption failed")]
    Encrypt,
    #[error("decryption failed (wrong key or tampered data)")]
    Decrypt,
    #[error("decrypted data is not valid UTF-8")]
    Utf8,
}

/// Key for inventory secret payloads.
#[derive(Clone)]
pub struct SecretCipher {
    key: [u8; KEY_LEN],
}

impl Drop for SecretCipher {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

impl std::fmt::Debug for SecretCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretCipher(..)")
    }
}

impl SecretCipher {
    pub fn new(key: [u8; KEY_LEN]) -> Self {
        Self { key }
    }

    /// Loads a key from its base64 representation.
    pub fn from_base64(encoded: &str) -> Result<Self, CryptoError> {
        let mut bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|_| CryptoError::KeyEncoding)?;
        if bytes.len() != KEY_LEN {
            let len = bytes.len();
            bytes.zeroize();
            return Err(CryptoError::KeyLength(len));
        }
        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(&bytes);
        bytes.zeroize();
        Ok(Self { key })
    }

    /// Fresh random key, for tests and local runs.
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_LEN];
        rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut key);
        Self { key }
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String, CryptoError> {
        let cipher = Aes256Gcm::new_from_slice(&self.key).map_err(|_| CryptoError::KeyLength(self.key.len()))?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| CryptoError::Encrypt)?;

        let mut result = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        result.extend_from_slice(&nonce_bytes);
        result.extend_from_slice(&ciphertext);

        Ok(base64::engine::general_purpose::STANDARD.encode(&result))
    }

    pub fn decrypt(&self, encrypted_b64: &str) -> Result<Vec<u8>, CryptoError> {
        let data = base64::engine::general_purpose::STANDARD
            .decode(encrypted_b64)
            .map_err(|_| CryptoError::InvalidEncoding)?;

        if data.len() < NONCE_LEN + TAG_LEN {
            return Err(CryptoError::TooShort);
        }

        let cipher = Aes256Gcm::new_from_slice(&self.key).map_err(|_| CryptoError::KeyLength(self.key.len()))?;
        let nonce = Nonce::from_slice(&data[..NONCE_LEN]);

        cipher
            .decrypt(nonce, &data[NONCE_LEN..])
            .map_err(|_| CryptoError::Decrypt)
    }

    pub fn encrypt_string(&self, plaintext: &str) -> Result<String, CryptoError> {
        self.encrypt(plaintext.as_bytes())
    }

    pub fn decrypt_string(&self, encrypted_b64: &str) -> Result<String, CryptoError> {
        let bytes = self.decrypt(encrypted_b64)?;
        String::from_utf8(bytes).map_err(|_| CryptoError::Utf8)
    }
}

impl From<CryptoError> for crate::error::AppError {
    fn from(err: CryptoError) -> Self {
        crate::error::AppError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decrypts_what_it_encrypts() {
        let cipher = SecretCipher::generate();
        let sealed = cipher.encrypt_string("user@example.com:hunter2").unwrap();
        assert!(!sealed.contains("hunter2"));
        assert_eq!(cipher.decrypt_string(&sealed).unwrap(), "user@example.com:hunter2");
    }

    #[test]
    fn nonce_differs_per_encryption() {
        let cipher = SecretCipher::generate();
        let a = cipher.encrypt_string("same").unwrap();
        let b = cipher.encrypt_string("same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_key_fails() {
        let sealed = SecretCipher::generate().encrypt_string("code-123").unwrap();
        assert_eq!(
            SecretCipher::generate().decrypt_string(&sealed),
            Err(CryptoError::Decrypt)
        );
    }

    #[test]
    fn rejects_short_or_garbled_input() {
        let cipher = SecretCipher::generate();
        assert_eq!(cipher.decrypt("AAAA"), Err(CryptoError::TooShort));
        assert_eq!(cipher.decrypt("not base64!"), Err(CryptoError::InvalidEncoding));
    }

    #[test]
    fn loads_key_from_base64() {
        let encoded = base64::engine::general_purpose::STANDARD.encode([7u8; KEY_LEN]);
        assert!(SecretCipher::from_base64(&encoded).is_ok());

        let short = base64::engine::general_purpose::STANDARD.encode([7u8; 16]);
        assert_eq!(
            SecretCipher::from_base64(&short).unwrap_err(),
            CryptoError::KeyLength(16)
        );
    }
}
