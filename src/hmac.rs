//! HMAC operations with constant-time verification
//!
//! The authentication tag of a token is HMAC-SHA256 over every byte that precedes it,
//! keyed with the signing half of the key. Verification compares tags in constant time
//! so a forged token learns nothing from how long rejection takes.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Length of an HMAC-SHA256 tag in bytes
pub const TAG_LENGTH: usize = 32;

#[derive(Debug, Error)]
pub enum HmacError {
    #[error("HMAC initialization failed")]
    InitFailed,

    #[error("HMAC verification failed")]
    VerificationFailed,
}

/// Calculate HMAC-SHA256 over data
pub fn calculate_tag(key: &[u8], data: &[u8]) -> Result<[u8; TAG_LENGTH], HmacError> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| HmacError::InitFailed)?;
    mac.update(data);

    let mut tag = [0u8; TAG_LENGTH];
    tag.copy_from_slice(&mac.finalize().into_bytes());
    Ok(tag)
}

/// Verify a stored tag against data using constant-time comparison
///
/// Returns Ok(()) if the tag is valid. A tag of the wrong length is rejected the same
/// way as a tag with the wrong contents.
pub fn verify_tag(key: &[u8], data: &[u8], expected: &[u8]) -> Result<(), HmacError> {
    let calculated = calculate_tag(key, data)?;

    if calculated[..].ct_eq(expected).into() {
        Ok(())
    } else {
        Err(HmacError::VerificationFailed)
    }
}
