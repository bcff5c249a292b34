//! Authenticated token encryption and decryption
//!
//! Encryption uses AES-128-CBC with PKCS#7 padding under the cipher half of the key and
//! authenticates the whole token with HMAC-SHA256 under the signing half.
//!
//! Decryption always authenticates first. A token whose tag does not verify is
//! rejected with [`TokenError::AuthenticationFailed`] before the ciphertext is touched,
//! so a wrong key, corruption and tampering are indistinguishable to the caller.

use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut};
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::warn;

use crate::helpers::{create_cbc_decryptor, create_cbc_encryptor, generate_iv, CryptoError, IV_LENGTH};
use crate::hmac::{calculate_tag, verify_tag, HmacError};
use crate::token::Token;
use crate::types::KeyMaterial;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("Malformed token: {reason}")]
    MalformedToken { reason: &'static str },

    #[error("Token authentication failed")]
    AuthenticationFailed,

    #[error("Token decryption failed: {reason}")]
    DecryptionError { reason: &'static str },

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

impl TokenError {
    /// Returns true if retrying the same call might succeed
    ///
    /// Only an unavailable entropy source is transient. The codec never retries on
    /// its own.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Crypto(CryptoError::EntropyUnavailable(_)))
    }

    /// Returns a suggestion for resolving this error
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::MalformedToken { .. } => {
                Some("Check that the input is a complete base64 token string")
            }
            Self::AuthenticationFailed => Some(
                "Check that the token was produced with the same secret and key strategy",
            ),
            _ => None,
        }
    }
}

impl From<HmacError> for TokenError {
    fn from(err: HmacError) -> Self {
        match err {
            HmacError::VerificationFailed => TokenError::AuthenticationFailed,
            HmacError::InitFailed => TokenError::Crypto(CryptoError::InvalidKeyLength),
        }
    }
}

/// Plaintext recovered from an authenticated token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptedToken {
    pub version: u8,
    pub timestamp: DateTime<Utc>,
    pub plaintext: Vec<u8>,
}

impl DecryptedToken {
    /// Seconds since the Unix epoch at encryption time
    pub fn timestamp_secs(&self) -> i64 {
        self.timestamp.timestamp()
    }

    pub fn plaintext(&self) -> &[u8] {
        &self.plaintext
    }

    pub fn into_plaintext(self) -> Vec<u8> {
        self.plaintext
    }

    /// Interpret the plaintext as UTF-8
    pub fn into_string(self) -> Result<String, std::string::FromUtf8Error> {
        String::from_utf8(self.plaintext)
    }
}

/// Encrypts and decrypts tokens under one key
///
/// The codec is stateless apart from the key and can be shared across threads.
///
/// # Example
///
/// ```
/// use covenant_fernet::{derive_fast, TokenCodec};
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let key = derive_fast("shared secret");
/// let codec = TokenCodec::new(&key);
///
/// let token = codec.encrypt(b"I AM THAT I AM")?;
/// let decrypted = codec.decrypt(&token)?;
/// assert_eq!(decrypted.plaintext(), b"I AM THAT I AM");
/// # Ok(())
/// # }
/// # example().unwrap();
/// ```
#[derive(Clone)]
pub struct TokenCodec {
    key: KeyMaterial,
}

impl TokenCodec {
    pub fn new(key: &KeyMaterial) -> Self {
        Self { key: key.clone() }
    }

    /// Encrypt with the current time and a fresh random IV
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String, TokenError> {
        let iv = generate_iv()?;
        let now = u64::try_from(Utc::now().timestamp()).unwrap_or(0);
        self.encrypt_with_parts(plaintext, now, &iv)
    }

    /// Encrypt with a caller-chosen timestamp and IV
    ///
    /// Reusing an IV under the same key leaks plaintext relationships. Use this for
    /// fixtures and interoperability checks, [`encrypt`](Self::encrypt) otherwise.
    pub fn encrypt_with_parts(
        &self,
        plaintext: &[u8],
        timestamp: u64,
        iv: &[u8; IV_LENGTH],
    ) -> Result<String, TokenError> {
        let ciphertext = create_cbc_encryptor(self.key.cipher_half(), iv)?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext);

        let token = Token::assemble(timestamp, iv, &ciphertext, |signed| {
            Ok(calculate_tag(self.key.signing_half(), signed)?)
        })?;
        Ok(token.encode())
    }

    /// Authenticate and decrypt a token string
    pub fn decrypt(&self, token: &str) -> Result<DecryptedToken, TokenError> {
        let token = self.authenticate(token)?;
        let timestamp = token_time(&token)?;

        let plaintext = create_cbc_decryptor(self.key.cipher_half(), &token.iv())?
            .decrypt_padded_vec_mut::<Pkcs7>(token.ciphertext())
            .map_err(|_| {
                warn!("authenticated token failed padding removal");
                TokenError::DecryptionError {
                    reason: "invalid padding",
                }
            })?;

        Ok(DecryptedToken {
            version: token.version(),
            timestamp,
            plaintext,
        })
    }

    /// Authenticate a token and return its timestamp without decrypting it
    pub fn extract_timestamp(&self, token: &str) -> Result<DateTime<Utc>, TokenError> {
        let token = self.authenticate(token)?;
        token_time(&token)
    }

    fn authenticate(&self, token: &str) -> Result<Token, TokenError> {
        let token = Token::decode(token)?;
        verify_tag(self.key.signing_half(), token.signed_bytes(), token.tag())?;
        Ok(token)
    }
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCodec").field("key", &self.key).finish()
    }
}

fn token_time(token: &Token) -> Result<DateTime<Utc>, TokenError> {
    i64::try_from(token.timestamp())
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .ok_or_else(|| {
            warn!("authenticated token carries an unrepresentable timestamp");
            TokenError::DecryptionError {
                reason: "timestamp out of range",
            }
        })
}

/// Encrypt a payload under the given key
pub fn encrypt(key: &KeyMaterial, plaintext: &[u8]) -> Result<String, TokenError> {
    TokenCodec::new(key).encrypt(plaintext)
}

/// Authenticate and decrypt a token under the given key
pub fn decrypt(key: &KeyMaterial, token: &str) -> Result<DecryptedToken, TokenError> {
    TokenCodec::new(key).decrypt(token)
}
