//! Cryptographic helper functions
//!
//! Common utilities for cipher initialization, IV generation and lenient base64 decoding.

use aes::Aes128;
use base64::{
    alphabet,
    engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
    Engine as _,
};
use cbc::cipher::KeyIvInit;
use rand::{rngs::OsRng, RngCore};
use thiserror::Error;

/// AES-128 in CBC mode, encrypting side
pub type Aes128CbcEnc = cbc::Encryptor<Aes128>;

/// AES-128 in CBC mode, decrypting side
pub type Aes128CbcDec = cbc::Decryptor<Aes128>;

/// Length of the CBC initialization vector in bytes
pub const IV_LENGTH: usize = 16;

/// URL-safe engine that writes padding but accepts input with or without it
pub const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(true)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Invalid key length")]
    InvalidKeyLength,

    #[error("Secure random source unavailable: {0}")]
    EntropyUnavailable(#[from] rand::Error),
}

/// Create an AES-128-CBC encryptor from the cipher half of a key
pub fn create_cbc_encryptor(key: &[u8], iv: &[u8; IV_LENGTH]) -> Result<Aes128CbcEnc, CryptoError> {
    Aes128CbcEnc::new_from_slices(key, iv).map_err(|_| CryptoError::InvalidKeyLength)
}

/// Create an AES-128-CBC decryptor from the cipher half of a key
pub fn create_cbc_decryptor(key: &[u8], iv: &[u8; IV_LENGTH]) -> Result<Aes128CbcDec, CryptoError> {
    Aes128CbcDec::new_from_slices(key, iv).map_err(|_| CryptoError::InvalidKeyLength)
}

/// Generate a random 128-bit IV from the operating system's secure source
///
/// A failing entropy source is reported rather than retried.
pub fn generate_iv() -> Result<[u8; IV_LENGTH], CryptoError> {
    let mut iv = [0u8; IV_LENGTH];
    OsRng.try_fill_bytes(&mut iv)?;
    Ok(iv)
}

/// Decode base64 written in either the URL-safe or the standard alphabet, padded or not
pub fn decode_base64_lenient(input: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let normalized: String = input
        .chars()
        .map(|c| match c {
            '+' => '-',
            '/' => '_',
            other => other,
        })
        .collect();
    URL_SAFE_LENIENT.decode(normalized)
}
