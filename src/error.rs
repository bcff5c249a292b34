//! Unified error type for the public API
//!
//! Internal modules keep their own error types for precise handling. This type gives
//! callers that mix key handling and token operations a single error to propagate.
//!
//! # Example
//!
//! ```
//! use covenant_fernet::{decrypt, CovenantError, KeyMaterial};
//!
//! fn open(encoded_key: &str, token: &str) -> Result<Vec<u8>, CovenantError> {
//!     let key = KeyMaterial::from_base64(encoded_key)?;
//!     Ok(decrypt(&key, token)?.into_plaintext())
//! }
//! ```

use thiserror::Error;

use crate::codec::TokenError;
use crate::helpers::CryptoError;
use crate::types::KeyError;

/// Unified error type for all key and token operations
#[derive(Debug, Error)]
pub enum CovenantError {
    /// Key format, length or strategy error
    #[error("Key error: {0}")]
    Key(#[from] KeyError),

    /// Token decoding, authentication or decryption error
    #[error("Token error: {0}")]
    Token(#[from] TokenError),
}

impl From<CryptoError> for CovenantError {
    fn from(err: CryptoError) -> Self {
        CovenantError::Token(TokenError::Crypto(err))
    }
}

impl CovenantError {
    /// Returns true if the error is potentially retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Token(e) => e.is_retryable(),
            Self::Key(_) => false,
        }
    }

    /// Returns a suggestion for resolving this error
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Token(e) => e.suggestion(),
            Self::Key(KeyError::InvalidLength { .. }) => {
                Some("Derived keys are 32 bytes; check the key was not truncated")
            }
            Self::Key(_) => None,
        }
    }

    /// Returns true if the token could not be decoded into the expected shape
    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::Token(TokenError::MalformedToken { .. }))
    }

    /// Returns true if the token failed authentication
    pub fn is_authentication_failure(&self) -> bool {
        matches!(self, Self::Token(TokenError::AuthenticationFailed))
    }
}
