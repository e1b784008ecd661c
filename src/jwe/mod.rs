//! # JWE Tokens
//!
//! Encrypted bearer tokens for the dashboard and the RSA key pair they are
//! encrypted with.
//!
//! ## Sub-modules
//!
//! - `auth_info` - Credentials carried in a token and the encrypted claims
//! - `compact` - JWE compact serialization (RSA-OAEP-256 + A256GCM)
//! - `key_holder` - Key pair kept consistent with the shared key holder Secret
//! - `token_manager` - Generate, decrypt and refresh tokens
//! - `error` - Error types

pub mod auth_info;
pub mod compact;
pub mod error;
pub mod key_holder;
pub mod token_manager;

pub use auth_info::{AuthInfo, AuthMethod, TokenClaims};
pub use compact::{Encrypter, JweObject};
pub use error::{JweError, KeyError, StartupError, TokenError};
pub use key_holder::{KeyHolder, KeyHolderConfig, RsaKeyHolder};
pub use token_manager::{JweTokenManager, TokenManager};
