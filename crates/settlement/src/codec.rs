//! Field-level encryption for sensitive settlement data
//!
//! Payloads are sealed with AES-256-GCM under a process-wide key. Each call
//! draws a fresh 96-bit nonce, and the caller's context string (the settlement
//! identifier) is bound as associated data, so a sealed payload only opens
//! on the record it was written for.
//!
//! Wire layout of an [`EncryptedPayload`]: `nonce (12) || ciphertext || tag (16)`.
//!
//! The same master key also yields, via BLAKE3 key derivation, the key for
//! the keyed content hash used by idempotency checks.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
    Aes256Gcm, Key, Nonce,
};
use rand::RngCore;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::SettlementError;
use crate::types::{SensitiveDetails, SettlementId};

/// AES-GCM nonce length in bytes
pub const NONCE_LEN: usize = 12;

/// AES-GCM authentication tag length in bytes
pub const TAG_LEN: usize = 16;

/// Master key length in bytes
pub const KEY_LEN: usize = 32;

/// Largest plaintext accepted by [`FieldCodec::encrypt`]
pub const MAX_PLAINTEXT_LEN: usize = 64 * 1024;

const CONTENT_HASH_CONTEXT: &str = "exchange-settlement 2026 content-hash v1";

/// Errors raised by the codec
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("{0}")]
    Encryption(String),

    #[error("{0}")]
    Decryption(String),
}

impl From<CodecError> for SettlementError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::InvalidKey(msg) => SettlementError::Internal(format!("invalid key material: {}", msg)),
            CodecError::Encryption(msg) => SettlementError::Encryption(msg),
            CodecError::Decryption(msg) => SettlementError::Decryption(msg),
        }
    }
}

/// 256-bit master key, wiped from memory on drop
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey([u8; KEY_LEN]);

impl EncryptionKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Parse a key from 64 hex characters
    pub fn from_hex(encoded: &str) -> Result<Self, CodecError> {
        let mut decoded = hex::decode(encoded.trim())
            .map_err(|e| CodecError::InvalidKey(format!("not valid hex: {}", e)))?;
        if decoded.len() != KEY_LEN {
            let len = decoded.len();
            decoded.zeroize();
            return Err(CodecError::InvalidKey(format!(
                "expected {} bytes, got {}",
                KEY_LEN, len
            )));
        }
        let mut bytes = [0u8; KEY_LEN];
        bytes.copy_from_slice(&decoded);
        decoded.zeroize();
        Ok(Self(bytes))
    }

    /// Generate a random key
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Hex encoding, for provisioning new deployments only
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EncryptionKey(<redacted>)")
    }
}

/// Sealed payload: nonce plus ciphertext with its trailing tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedPayload {
    pub nonce: [u8; NONCE_LEN],
    pub ciphertext: Vec<u8>,
}

impl EncryptedPayload {
    /// Serialize to `nonce || ciphertext`
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(NONCE_LEN + self.ciphertext.len());
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    /// Deserialize from bytes produced by [`to_bytes`](Self::to_bytes)
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() < NONCE_LEN + TAG_LEN {
            return Err(CodecError::Decryption("payload too short".into()));
        }
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&bytes[..NONCE_LEN]);
        Ok(Self {
            nonce,
            ciphertext: bytes[NONCE_LEN..].to_vec(),
        })
    }
}

/// Encrypts and decrypts settlement fields under one master key
///
/// Built once at startup and shared read-only as `Arc<FieldCodec>`.
pub struct FieldCodec {
    cipher: Aes256Gcm,
    hash_key: [u8; KEY_LEN],
}

impl FieldCodec {
    pub fn new(key: &EncryptionKey) -> Self {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
        let hash_key = blake3::derive_key(CONTENT_HASH_CONTEXT, key.as_bytes());
        Self { cipher, hash_key }
    }

    /// Seal `plaintext`, binding `context` as associated data
    ///
    /// # Errors
    ///
    /// [`CodecError::Encryption`] when the plaintext is empty or larger than
    /// [`MAX_PLAINTEXT_LEN`].
    pub fn encrypt(&self, plaintext: &[u8], context: &str) -> Result<EncryptedPayload, CodecError> {
        if plaintext.is_empty() {
            return Err(CodecError::Encryption("plaintext is empty".into()));
        }
        if plaintext.len() > MAX_PLAINTEXT_LEN {
            return Err(CodecError::Encryption(format!(
                "plaintext of {} bytes exceeds limit of {}",
                plaintext.len(),
                MAX_PLAINTEXT_LEN
            )));
        }

        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(
                &nonce,
                Payload {
                    msg: plaintext,
                    aad: context.as_bytes(),
                },
            )
            .map_err(|_| CodecError::Encryption("cipher rejected input".into()))?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        nonce_bytes.copy_from_slice(nonce.as_slice());
        Ok(EncryptedPayload {
            nonce: nonce_bytes,
            ciphertext,
        })
    }

    /// Open a payload sealed under the same key and `context`
    ///
    /// # Errors
    ///
    /// [`CodecError::Decryption`] on a truncated payload, a modified
    /// ciphertext, tag or nonce, a different context, or a different key.
    pub fn decrypt(&self, payload: &EncryptedPayload, context: &str) -> Result<Vec<u8>, CodecError> {
        if payload.ciphertext.len() < TAG_LEN {
            return Err(CodecError::Decryption("payload too short".into()));
        }
        self.cipher
            .decrypt(
                Nonce::from_slice(&payload.nonce),
                Payload {
                    msg: payload.ciphertext.as_slice(),
                    aad: context.as_bytes(),
                },
            )
            .map_err(|_| CodecError::Decryption("authentication failed".into()))
    }

    /// Keyed BLAKE3 hash, hex encoded
    pub fn content_hash(&self, data: &[u8]) -> String {
        blake3::keyed_hash(&self.hash_key, data).to_hex().to_string()
    }

    /// Serialize and seal the sensitive fields of instruction `id`
    pub fn seal_details(
        &self,
        details: &SensitiveDetails,
        id: &SettlementId,
    ) -> Result<EncryptedPayload, CodecError> {
        let mut plaintext = serde_json::to_vec(details)
            .map_err(|e| CodecError::Encryption(format!("failed to encode details: {}", e)))?;
        let sealed = self.encrypt(&plaintext, id.as_str());
        plaintext.zeroize();
        sealed
    }

    /// Open and parse the sensitive fields of instruction `id`
    pub fn open_details(
        &self,
        payload: &EncryptedPayload,
        id: &SettlementId,
    ) -> Result<SensitiveDetails, CodecError> {
        let mut plaintext = self.decrypt(payload, id.as_str())?;
        let details = serde_json::from_slice(&plaintext)
            .map_err(|_| CodecError::Decryption("payload is not a details document".into()));
        plaintext.zeroize();
        details
    }
}

impl Drop for FieldCodec {
    fn drop(&mut self) {
        self.hash_key.zeroize();
    }
}

impl std::fmt::Debug for FieldCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("FieldCodec(<redacted>)")
    }
}
