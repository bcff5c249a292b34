//! Common test utilities for covenant-fernet integration tests

#![allow(dead_code)]

use base64::{engine::general_purpose::URL_SAFE, Engine as _};
use covenant_fernet::{derive_fast, KeyMaterial};

/// Master string used by the historical deployment
pub const MASTER_SECRET: &str = "c59df115ba2d3679cb2f164bcc3860474169126583f1d41d935b94dcb1abc521";

/// Test payloads
pub const COVENANT_TEST: &[u8] = b"COVENANT-TEST";
pub const I_AM: &str = "I AM THAT I AM";

/// Token for `I_AM` under the fast key of `MASTER_SECRET`, timestamp 1700000000, IV 00..0f
pub const KNOWN_TOKEN: &str = "gAAAAABlU_EAAAECAwQFBgcICQoLDA0OD7vUolwap5T5QtJ7X2W0WlqVEtlARzrbkZFkIX7aQecZyAOkFdE-18Kr5l4Qe7BGkQ==";
pub const KNOWN_TIMESTAMP: i64 = 1_700_000_000;

pub fn master_fast_key() -> KeyMaterial {
    derive_fast(MASTER_SECRET)
}

/// Decode a token string into its raw bytes (padded URL-safe form only)
pub fn raw_token(token: &str) -> Vec<u8> {
    URL_SAFE.decode(token).expect("test token should be valid base64")
}

/// Encode raw token bytes the way the codec does
pub fn encode_raw(raw: &[u8]) -> String {
    URL_SAFE.encode(raw)
}
