//! # Errors
//!
//! Error types for key material, the JWE envelope and the token manager.

use crate::sync::SyncError;
use thiserror::Error;

/// Failures handling RSA key material and the key holder secret
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("failed to generate {bits}-bit RSA key: {message}")]
    Generation { bits: usize, message: String },

    #[error("key holder secret is missing data entry {0:?}")]
    MissingEntry(&'static str),

    #[error("invalid PEM in entry {entry:?}: {message}")]
    InvalidPem { entry: &'static str, message: String },

    #[error("unexpected PEM label {actual:?}, expected {expected:?}")]
    UnexpectedLabel {
        expected: &'static str,
        actual: String,
    },

    #[error("public key does not belong to the private key")]
    KeyMismatch,

    #[error("failed to export key: {0}")]
    Export(String),
}

/// Failures in the compact JWE envelope
#[derive(Debug, Error)]
pub enum JweError {
    /// The token could not be parsed; decryption was not attempted
    #[error("malformed JWE: {0}")]
    Malformed(String),

    /// Decryption failed, typically because the token was encrypted with another key
    #[error("JWE decryption failed: {0}")]
    CryptoFailure(String),

    #[error("JWE encryption failed: {0}")]
    Encryption(String),
}

/// Consumer-facing token errors.
///
/// Invalid, expired and key-rotated tokens stay distinguishable so callers can pick
/// between a silent refresh and a full re-login.
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("invalid input: no token provided")]
    NoTokenProvided,

    #[error("token expired")]
    Expired,

    #[error("token was encrypted with a key that is no longer active")]
    EncryptionKeyChanged,

    #[error("invalid token: {0}")]
    Invalid(String),

    #[error("failed to serialize token payload: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("failed to encrypt token: {0}")]
    Encryption(String),
}

impl TokenError {
    /// HTTP status for this error
    pub fn status_code(&self) -> u16 {
        match self {
            TokenError::NoTokenProvided => 400,
            TokenError::Expired | TokenError::EncryptionKeyChanged | TokenError::Invalid(_) => 401,
            TokenError::Serialization(_) | TokenError::Encryption(_) => 500,
        }
    }

    /// Stable reason string the frontend keys its messages on
    pub fn reason(&self) -> &'static str {
        match self {
            TokenError::NoTokenProvided => "MSG_INVALID_INPUT_ERROR",
            TokenError::Expired => "MSG_TOKEN_EXPIRED_ERROR",
            TokenError::EncryptionKeyChanged => "MSG_ENCRYPTION_KEY_CHANGED",
            TokenError::Invalid(_) => "MSG_LOGIN_UNAUTHORIZED_ERROR",
            TokenError::Serialization(_) | TokenError::Encryption(_) => "MSG_INTERNAL_ERROR",
        }
    }
}

/// Key holder initialization failed; the process must not serve tokens
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Key(#[from] KeyError),

    #[error("failed to register key holder handlers: {0}")]
    Registration(SyncError),

    #[error("key holder initialization failed after {attempts} attempts: {source}")]
    Backend {
        attempts: u32,
        #[source]
        source: SyncError,
    },

    #[error("key generation task failed: {0}")]
    Task(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_errors_map_to_statuses() {
        assert_eq!(TokenError::NoTokenProvided.status_code(), 400);
        assert_eq!(TokenError::Expired.status_code(), 401);
        assert_eq!(TokenError::EncryptionKeyChanged.status_code(), 401);
        assert_eq!(TokenError::Invalid("x".into()).status_code(), 401);
        assert_eq!(TokenError::Encryption("x".into()).status_code(), 500);
    }

    #[test]
    fn test_token_error_reasons_are_distinct() {
        let reasons = [
            TokenError::Expired.reason(),
            TokenError::EncryptionKeyChanged.reason(),
            TokenError::Invalid("x".into()).reason(),
        ];
        assert_eq!(reasons[0], "MSG_TOKEN_EXPIRED_ERROR");
        assert_eq!(reasons[1], "MSG_ENCRYPTION_KEY_CHANGED");
        assert_eq!(reasons[2], "MSG_LOGIN_UNAUTHORIZED_ERROR");
    }
}
