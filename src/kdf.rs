//! Key derivation from a shared secret
//!
//! Two interchangeable strategies turn a secret string into 32 bytes of
//! [`KeyMaterial`]:
//!
//! - **Strong**: PBKDF2-HMAC-SHA256, 100,000 iterations. Expensive on purpose; run it
//!   on a blocking worker when called from an async runtime.
//! - **Fast**: a single SHA-256 over the secret followed by the salt label.
//!
//! Both are deterministic and use the secret's UTF-8 bytes as-is, with no
//! normalization. The two strategies do not agree with each other, so a token
//! population must be encrypted and decrypted under the same one.

use std::fmt;
use std::str::FromStr;

use pbkdf2::pbkdf2_hmac;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

use crate::types::{KeyError, KeyMaterial, KEY_LENGTH};

/// Fixed salt label mixed into both strategies
pub const KDF_SALT: &[u8] = b"COVENANT_SALT";

/// PBKDF2 iteration count for the strong strategy
pub const PBKDF2_ITERATIONS: u32 = 100_000;

/// Which derivation a deployment uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyStrategy {
    /// PBKDF2-HMAC-SHA256
    #[default]
    Strong,
    /// Single SHA-256
    Fast,
}

impl KeyStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyStrategy::Strong => "strong",
            KeyStrategy::Fast => "fast",
        }
    }
}

impl fmt::Display for KeyStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyStrategy {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strong" => Ok(KeyStrategy::Strong),
            "fast" => Ok(KeyStrategy::Fast),
            _ => Err(KeyError::UnknownStrategy(s.to_string())),
        }
    }
}

/// Derive key material with PBKDF2-HMAC-SHA256
///
/// An empty secret is accepted and yields a well-defined (weak) key.
///
/// # Example
///
/// ```
/// use covenant_fernet::kdf::derive_strong;
///
/// let key = derive_strong("shared secret");
/// assert_eq!(key.as_slice().len(), 32);
/// ```
pub fn derive_strong(secret: &str) -> KeyMaterial {
    let mut key = [0u8; KEY_LENGTH];
    pbkdf2_hmac::<Sha256>(secret.as_bytes(), KDF_SALT, PBKDF2_ITERATIONS, &mut key);
    let material = KeyMaterial::from_bytes(key);
    key.zeroize();
    material
}

/// Derive key material with a single SHA-256 over `secret || KDF_SALT`
pub fn derive_fast(secret: &str) -> KeyMaterial {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.update(KDF_SALT);
    let mut digest = hasher.finalize();

    let mut key = [0u8; KEY_LENGTH];
    key.copy_from_slice(&digest);
    digest.as_mut_slice().zeroize();

    let material = KeyMaterial::from_bytes(key);
    key.zeroize();
    material
}

/// Derive key material with the given strategy
pub fn derive_key(secret: &str, strategy: KeyStrategy) -> KeyMaterial {
    match strategy {
        KeyStrategy::Strong => derive_strong(secret),
        KeyStrategy::Fast => derive_fast(secret),
    }
}
