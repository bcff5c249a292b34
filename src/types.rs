//! Zeroizing key material
//!
//! A derived key is 32 bytes split into two disjoint 16-byte halves: the signing half
//! keys the HMAC-SHA256 tag and the cipher half keys AES-128-CBC. The bytes are cleared
//! from memory when the key is dropped.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::helpers::decode_base64_lenient;

/// Length of derived key material in bytes
pub const KEY_LENGTH: usize = 32;

/// Length of each key half in bytes
pub const HALF_KEY_LENGTH: usize = KEY_LENGTH / 2;

/// 32 bytes of key material derived from a shared secret
#[derive(Clone, Zeroize, ZeroizeOnDrop, PartialEq, Eq)]
pub struct KeyMaterial(pub(crate) [u8; KEY_LENGTH]);

impl KeyMaterial {
    /// Wrap raw key bytes
    pub fn from_bytes(bytes: [u8; KEY_LENGTH]) -> Self {
        KeyMaterial(bytes)
    }

    /// Create key material from a 32-byte slice
    pub fn from_slice(bytes: &[u8]) -> Result<Self, KeyError> {
        if bytes.len() != KEY_LENGTH {
            return Err(KeyError::InvalidLength {
                expected: KEY_LENGTH,
                got: bytes.len(),
            });
        }
        let mut key = [0u8; KEY_LENGTH];
        key.copy_from_slice(bytes);
        Ok(KeyMaterial(key))
    }

    /// Decode key material from its textual form
    ///
    /// Accepts the URL-safe or standard base64 alphabet, with or without padding.
    pub fn from_base64(encoded: &str) -> Result<Self, KeyError> {
        let mut bytes = decode_base64_lenient(encoded.trim())?;
        let key = Self::from_slice(&bytes);
        bytes.zeroize();
        key
    }

    /// Render as URL-safe base64 with padding stripped
    pub fn to_base64(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.0)
    }

    /// Get a reference to the key bytes
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    /// First 16 bytes, used for the authentication tag
    pub fn signing_half(&self) -> &[u8] {
        &self.0[..HALF_KEY_LENGTH]
    }

    /// Last 16 bytes, used for the block cipher
    pub fn cipher_half(&self) -> &[u8] {
        &self.0[HALF_KEY_LENGTH..]
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("KeyMaterial").field(&"[REDACTED]").finish()
    }
}

/// Key-related errors
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("Invalid key length: expected {expected}, got {got}")]
    InvalidLength { expected: usize, got: usize },

    #[error("Invalid key encoding: {0}")]
    Encoding(#[from] base64::DecodeError),

    #[error("Unknown key strategy '{0}' (expected 'strong' or 'fast')")]
    UnknownStrategy(String),
}
