//! Token byte layout and textual encoding
//!
//! ```text
//! [version: 1][timestamp: 8, big-endian][iv: 16][ciphertext: 16*n][tag: 32]
//! ```
//!
//! The tag is HMAC-SHA256 over every byte before it. Tokens travel as URL-safe base64;
//! decoders accept padded and unpadded input, plus one extra layer of base64 wrapping
//! that an older producer applied by mistake.

use base64::Engine as _;
use tracing::debug;

use crate::codec::TokenError;
use crate::helpers::{decode_base64_lenient, IV_LENGTH, URL_SAFE_LENIENT};
use crate::hmac::TAG_LENGTH;

/// Version marker identifying this token format
pub const TOKEN_VERSION: u8 = 0x80;

/// Cipher block size in bytes
pub const BLOCK_SIZE: usize = 16;

const VERSION_LENGTH: usize = 1;
const TIMESTAMP_LENGTH: usize = 8;

/// Bytes before the ciphertext: version, timestamp and IV
pub const HEADER_LENGTH: usize = VERSION_LENGTH + TIMESTAMP_LENGTH + IV_LENGTH;

/// Smallest well-formed token: header, one ciphertext block and the tag
pub const MIN_TOKEN_LENGTH: usize = HEADER_LENGTH + BLOCK_SIZE + TAG_LENGTH;

/// A token whose byte layout has been checked
///
/// Holding a `Token` says nothing about authenticity. The tag is verified by
/// [`TokenCodec`](crate::TokenCodec) before any field is trusted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    raw: Vec<u8>,
}

impl Token {
    /// Validate the layout of raw token bytes
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, TokenError> {
        if !is_plausible(&bytes) {
            return Err(TokenError::MalformedToken {
                reason: "missing version marker or shorter than the minimum token",
            });
        }
        let ciphertext_len = bytes.len() - HEADER_LENGTH - TAG_LENGTH;
        if ciphertext_len % BLOCK_SIZE != 0 {
            return Err(TokenError::MalformedToken {
                reason: "ciphertext is not a whole number of cipher blocks",
            });
        }
        Ok(Token { raw: bytes })
    }

    /// Assemble a token from its parts
    pub(crate) fn assemble(
        timestamp: u64,
        iv: &[u8; IV_LENGTH],
        ciphertext: &[u8],
        tag_for: impl FnOnce(&[u8]) -> Result<[u8; TAG_LENGTH], TokenError>,
    ) -> Result<Self, TokenError> {
        let mut raw = Vec::with_capacity(HEADER_LENGTH + ciphertext.len() + TAG_LENGTH);
        raw.push(TOKEN_VERSION);
        raw.extend_from_slice(&timestamp.to_be_bytes());
        raw.extend_from_slice(iv);
        raw.extend_from_slice(ciphertext);

        let tag = tag_for(&raw)?;
        raw.extend_from_slice(&tag);
        Ok(Token { raw })
    }

    /// Decode a token string, falling back to the double-encoded form
    pub fn decode(token: &str) -> Result<Self, TokenError> {
        Self::from_bytes(decode_token(token)?)
    }

    /// Render as URL-safe base64 with padding
    pub fn encode(&self) -> String {
        encode_token(&self.raw)
    }

    pub fn version(&self) -> u8 {
        self.raw[0]
    }

    /// Seconds since the Unix epoch, as written by the producer
    pub fn timestamp(&self) -> u64 {
        let mut ts = [0u8; TIMESTAMP_LENGTH];
        ts.copy_from_slice(&self.raw[VERSION_LENGTH..VERSION_LENGTH + TIMESTAMP_LENGTH]);
        u64::from_be_bytes(ts)
    }

    pub fn iv(&self) -> [u8; IV_LENGTH] {
        let mut iv = [0u8; IV_LENGTH];
        iv.copy_from_slice(&self.raw[VERSION_LENGTH + TIMESTAMP_LENGTH..HEADER_LENGTH]);
        iv
    }

    pub fn ciphertext(&self) -> &[u8] {
        &self.raw[HEADER_LENGTH..self.tag_offset()]
    }

    pub fn tag(&self) -> &[u8] {
        &self.raw[self.tag_offset()..]
    }

    /// Everything the tag covers
    pub fn signed_bytes(&self) -> &[u8] {
        &self.raw[..self.tag_offset()]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.raw
    }

    fn tag_offset(&self) -> usize {
        self.raw.len() - TAG_LENGTH
    }
}

/// Encode raw token bytes as URL-safe base64 with padding
pub fn encode_token(raw: &[u8]) -> String {
    URL_SAFE_LENIENT.encode(raw)
}

/// Decode a token string into raw bytes
///
/// The direct decode is tried first. When it fails, or the result lacks the version
/// marker or minimum length, the input is treated as base64 of a token string and
/// decoded twice. Exactly one extra layer is unwrapped; deeper nesting is rejected.
pub fn decode_token(token: &str) -> Result<Vec<u8>, TokenError> {
    let token = token.trim();
    if token.is_empty() {
        return Err(TokenError::MalformedToken {
            reason: "empty token",
        });
    }

    if let Some(raw) = decode_base64_lenient(token).ok().filter(|raw| is_plausible(raw)) {
        return Ok(raw);
    }

    debug!("direct token decode failed plausibility check, trying double-encoded form");
    decode_base64_lenient(token)
        .ok()
        .and_then(|outer| String::from_utf8(outer).ok())
        .and_then(|inner| decode_base64_lenient(inner.trim()).ok())
        .filter(|raw| is_plausible(raw))
        .ok_or(TokenError::MalformedToken {
            reason: "not a token under direct or double base64 decoding",
        })
}

fn is_plausible(raw: &[u8]) -> bool {
    raw.first() == Some(&TOKEN_VERSION) && raw.len() >= MIN_TOKEN_LENGTH
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
    use base64::Engine as _;

    fn sample_raw(blocks: usize) -> Vec<u8> {
        let mut raw = vec![TOKEN_VERSION];
        raw.extend_from_slice(&1_700_000_000u64.to_be_bytes());
        raw.extend((0u8..16).collect::<Vec<_>>());
        raw.extend(vec![0xaa; blocks * BLOCK_SIZE]);
        raw.extend(vec![0xbb; TAG_LENGTH]);
        raw
    }

    #[test]
    fn test_layout_accessors() {
        let token = Token::from_bytes(sample_raw(2)).unwrap();
        assert_eq!(token.version(), 0x80);
        assert_eq!(token.timestamp(), 1_700_000_000);
        assert_eq!(token.iv(), [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15]);
        assert_eq!(token.ciphertext(), &[0xaa; 32][..]);
        assert_eq!(token.tag(), &[0xbb; 32][..]);
        assert_eq!(token.signed_bytes().len(), HEADER_LENGTH + 32);
        assert_eq!(token.as_bytes().len(), 1 + 8 + 16 + 32 + 32);
    }

    #[test]
    fn test_minimum_length() {
        assert_eq!(MIN_TOKEN_LENGTH, 73);
        assert!(Token::from_bytes(sample_raw(1)).is_ok());

        let mut short = sample_raw(1);
        short.truncate(MIN_TOKEN_LENGTH - 1);
        assert!(matches!(
            Token::from_bytes(short),
            Err(TokenError::MalformedToken { .. })
        ));
    }

    #[test]
    fn test_rejects_wrong_version() {
        let mut raw = sample_raw(1);
        raw[0] = 0x81;
        assert!(matches!(
            Token::from_bytes(raw),
            Err(TokenError::MalformedToken { .. })
        ));
    }

    #[test]
    fn test_rejects_unaligned_ciphertext() {
        let mut raw = sample_raw(2);
        raw.remove(HEADER_LENGTH);
        assert!(matches!(
            Token::from_bytes(raw),
            Err(TokenError::MalformedToken { .. })
        ));
    }

    #[test]
    fn test_decode_padded_and_unpadded() {
        let raw = sample_raw(1);
        let padded = encode_token(&raw);
        assert!(padded.ends_with('='));
        assert_eq!(decode_token(&padded).unwrap(), raw);
        assert_eq!(decode_token(&URL_SAFE_NO_PAD.encode(&raw)).unwrap(), raw);
    }

    #[test]
    fn test_decode_double_encoded() {
        let raw = sample_raw(1);
        let once = encode_token(&raw);
        let twice = STANDARD.encode(once.as_bytes());
        assert_eq!(decode_token(&twice).unwrap(), raw);

        let twice_url = URL_SAFE_NO_PAD.encode(once.as_bytes());
        assert_eq!(decode_token(&twice_url).unwrap(), raw);
    }

    #[test]
    fn test_triple_encoding_is_rejected() {
        let raw = sample_raw(1);
        let once = encode_token(&raw);
        let twice = STANDARD.encode(once.as_bytes());
        let thrice = STANDARD.encode(twice.as_bytes());
        assert!(matches!(
            decode_token(&thrice),
            Err(TokenError::MalformedToken { .. })
        ));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        for input in ["", "   ", "hello world", "!!!!", "gAAAA", "Zm9vYmFy"] {
            assert!(
                matches!(decode_token(input), Err(TokenError::MalformedToken { .. })),
                "input {input:?} should be malformed"
            );
        }
    }

    #[test]
    fn test_decode_trims_whitespace() {
        let raw = sample_raw(1);
        let padded = format!("  {}\n", encode_token(&raw));
        assert_eq!(decode_token(&padded).unwrap(), raw);
    }
}
