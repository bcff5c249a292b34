//! Covenant Fernet
//!
//! Versioned, timestamped, HMAC-authenticated symmetric encryption tokens, with two
//! interchangeable ways of deriving the key from a shared secret.
//!
//! ```
//! use covenant_fernet::{decrypt, derive_key, encrypt, KeyStrategy};
//!
//! # fn example() -> Result<(), covenant_fernet::CovenantError> {
//! let key = derive_key("shared secret", KeyStrategy::Fast);
//! let token = encrypt(&key, b"COVENANT-TEST")?;
//! let decrypted = decrypt(&key, &token)?;
//! assert_eq!(decrypted.plaintext(), b"COVENANT-TEST");
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

pub mod codec;
pub mod error;
pub mod helpers;
pub mod hmac;
pub mod kdf;
pub mod prelude;
pub mod token;
pub mod types;

pub use codec::{decrypt, encrypt, DecryptedToken, TokenCodec, TokenError};
pub use error::CovenantError;
pub use helpers::CryptoError;
pub use hmac::HmacError;
pub use kdf::{derive_fast, derive_key, derive_strong, KeyStrategy};
pub use token::{Token, TOKEN_VERSION};
pub use types::{KeyError, KeyMaterial};
