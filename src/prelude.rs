//! Covenant Fernet prelude
//!
//! ```rust
//! use covenant_fernet::prelude::*;
//!
//! let codec = TokenCodec::new(&derive_key("secret", KeyStrategy::Fast));
//! # let _ = codec;
//! ```

pub use crate::codec::{decrypt, encrypt, DecryptedToken, TokenCodec, TokenError};
pub use crate::error::CovenantError;
pub use crate::kdf::{derive_fast, derive_key, derive_strong, KeyStrategy};
pub use crate::token::Token;
pub use crate::types::{KeyError, KeyMaterial};
