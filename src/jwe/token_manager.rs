//! # JWE Token Manager
//!
//! Turns [`AuthInfo`] into an opaque bearer token and back.
//!
//! The payload is `{"authInfo": ..., "iat": ..., "exp": ...}` encrypted as a compact
//! JWE for the key holder's current key. Expiry is checked here after decryption
//! against wall-clock seconds; the JWE envelope carries no expiry of its own.

use super::auth_info::{AuthInfo, TokenClaims};
use super::compact::JweObject;
use super::error::{JweError, TokenError};
use super::key_holder::KeyHolder;
use crate::constants::DEFAULT_TOKEN_TTL_SECS;
use crate::observability::metrics;
use async_trait::async_trait;
use chrono::Utc;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, warn};
use zeroize::Zeroizing;

/// Issues, decrypts and renews tokens
#[async_trait]
pub trait TokenManager: Send + Sync {
    /// Encrypt `auth_info` into a token valid for the configured TTL
    fn generate(&self, auth_info: &AuthInfo) -> Result<String, TokenError>;

    /// Decrypt a token issued by any replica sharing the current key
    async fn decrypt(&self, token: &str) -> Result<AuthInfo, TokenError>;

    /// Exchange a still valid token for a new one with a renewed TTL
    async fn refresh(&self, token: &str) -> Result<String, TokenError>;

    /// Override the token TTL in seconds; 0 disables expiry
    fn set_token_ttl(&self, seconds: u64);
}

/// [`TokenManager`] using RSA-OAEP-256 + A256GCM compact JWE
pub struct JweTokenManager {
    key_holder: Arc<dyn KeyHolder>,
    token_ttl: AtomicU64,
}

impl fmt::Debug for JweTokenManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JweTokenManager")
            .field("token_ttl", &self.token_ttl())
            .finish_non_exhaustive()
    }
}

impl JweTokenManager {
    pub fn new(key_holder: Arc<dyn KeyHolder>) -> Self {
        Self {
            key_holder,
            token_ttl: AtomicU64::new(DEFAULT_TOKEN_TTL_SECS),
        }
    }

    pub fn token_ttl(&self) -> u64 {
        self.token_ttl.load(Ordering::Relaxed)
    }

    fn decrypt_payload(&self, object: &JweObject) -> Result<Zeroizing<Vec<u8>>, JweError> {
        object.decrypt(&self.key_holder.key())
    }

    /// Decrypt, retrying once after a key refresh if the current key does not fit
    async fn decrypt_claims(&self, token: &str) -> Result<TokenClaims, TokenError> {
        let object = JweObject::parse(token).map_err(|e| TokenError::Invalid(e.to_string()))?;

        let plaintext = match self.decrypt_payload(&object) {
            Ok(plaintext) => plaintext,
            Err(JweError::CryptoFailure(reason)) => {
                debug!(error = %reason, "Token does not decrypt with the current key, refreshing key");
                let before = self.key_holder.key();
                match self.key_holder.refresh().await {
                    Ok(()) => {}
                    Err(err) if err.is_fatal() => {
                        error!(error = %err, "Key refresh after decryption failure failed fatally");
                    }
                    Err(err) => warn!(error = %err, "Key refresh after decryption failure failed"),
                }
                if Arc::ptr_eq(&before, &self.key_holder.key()) {
                    return Err(TokenError::EncryptionKeyChanged);
                }
                self.decrypt_payload(&object)
                    .map_err(|_| TokenError::EncryptionKeyChanged)?
            }
            Err(err) => return Err(TokenError::Invalid(err.to_string())),
        };

        let claims: TokenClaims = serde_json::from_slice(&plaintext)
            .map_err(|e| TokenError::Invalid(format!("invalid token payload: {e}")))?;
        if claims.is_expired_at(Utc::now()) {
            return Err(TokenError::Expired);
        }
        Ok(claims)
    }

    fn record_failure<T>(result: Result<T, TokenError>) -> Result<T, TokenError> {
        if let Err(err) = &result {
            metrics::increment_token_failures(err.reason());
            debug!(error = %err, reason = err.reason(), "Token rejected");
        }
        result
    }
}

#[async_trait]
impl TokenManager for JweTokenManager {
    fn generate(&self, auth_info: &AuthInfo) -> Result<String, TokenError> {
        let claims = TokenClaims::new(auth_info.clone(), Utc::now(), self.token_ttl());
        let payload = Zeroizing::new(serde_json::to_vec(&claims)?);
        let token = self
            .key_holder
            .encrypter()
            .encrypt(&payload)
            .map_err(|e| TokenError::Encryption(e.to_string()))?;
        metrics::increment_tokens_generated();
        Ok(token)
    }

    async fn decrypt(&self, token: &str) -> Result<AuthInfo, TokenError> {
        let claims = Self::record_failure(self.decrypt_claims(token).await)?;
        Ok(claims.auth_info)
    }

    async fn refresh(&self, token: &str) -> Result<String, TokenError> {
        if token.is_empty() {
            return Self::record_failure(Err(TokenError::NoTokenProvided));
        }
        let claims = Self::record_failure(self.decrypt_claims(token).await)?;
        self.generate(&claims.auth_info)
    }

    fn set_token_ttl(&self, seconds: u64) {
        self.token_ttl.store(seconds, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jwe::key_holder::generate_key;
    use crate::sync::{lock, SyncError};
    use rsa::RsaPrivateKey;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    /// Key holder whose refresh adopts whatever the "backend" holds
    struct StaticKeyHolder {
        active: Mutex<Arc<RsaPrivateKey>>,
        backend: Mutex<Arc<RsaPrivateKey>>,
        refreshes: AtomicUsize,
    }

    impl StaticKeyHolder {
        fn new() -> Arc<Self> {
            let key = Arc::new(generate_key(1024).unwrap());
            Arc::new(Self {
                active: Mutex::new(Arc::clone(&key)),
                backend: Mutex::new(key),
                refreshes: AtomicUsize::new(0),
            })
        }

        /// Another replica rotated the shared key; we have not seen it yet
        fn rotate_in_backend(&self) {
            *lock(&self.backend) = Arc::new(generate_key(1024).unwrap());
        }

        /// The shared key was replaced and we already follow it
        fn rotate(&self) {
            let key = Arc::new(generate_key(1024).unwrap());
            *lock(&self.backend) = Arc::clone(&key);
            *lock(&self.active) = key;
        }
    }

    #[async_trait]
    impl KeyHolder for StaticKeyHolder {
        fn key(&self) -> Arc<RsaPrivateKey> {
            Arc::clone(&lock(&self.active))
        }

        async fn refresh(&self) -> Result<(), SyncError> {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
            let backend = Arc::clone(&lock(&self.backend));
            *lock(&self.active) = backend;
            Ok(())
        }
    }

    fn manager(holder: &Arc<StaticKeyHolder>) -> JweTokenManager {
        JweTokenManager::new(Arc::clone(holder) as Arc<dyn KeyHolder>)
    }

    #[tokio::test]
    async fn test_generate_decrypt_roundtrip() {
        let holder = StaticKeyHolder::new();
        let manager = manager(&holder);
        let info = AuthInfo::basic("admin", "secret").impersonating("jane", vec!["ops".into()]);

        let token = manager.generate(&info).unwrap();
        assert_eq!(manager.decrypt(&token).await.unwrap(), info);
        assert_eq!(holder.refreshes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_malformed_token_is_invalid() {
        let holder = StaticKeyHolder::new();
        let manager = manager(&holder);

        assert!(matches!(manager.decrypt("not-a-token").await, Err(TokenError::Invalid(_))));
        assert!(matches!(manager.refresh("a.b.c.d.e").await, Err(TokenError::Invalid(_))));
    }

    #[tokio::test]
    async fn test_token_from_rotated_key_reports_key_change() {
        let holder = StaticKeyHolder::new();
        let manager = manager(&holder);
        let token = manager.generate(&AuthInfo::bearer("t")).unwrap();

        holder.rotate();

        assert!(matches!(
            manager.decrypt(&token).await,
            Err(TokenError::EncryptionKeyChanged)
        ));
        assert_eq!(holder.refreshes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missed_rotation_recovers_after_refresh() {
        let holder = StaticKeyHolder::new();
        let issuer = StaticKeyHolder::new();
        holder.rotate_in_backend();
        // The issuing replica already uses the rotated key
        *lock(&issuer.active) = Arc::clone(&lock(&holder.backend));

        let token = manager(&issuer).generate(&AuthInfo::bearer("t")).unwrap();
        let info = manager(&holder).decrypt(&token).await.unwrap();

        assert_eq!(info, AuthInfo::bearer("t"));
        assert_eq!(holder.refreshes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_refresh_is_rejected() {
        let holder = StaticKeyHolder::new();
        let manager = manager(&holder);
        assert!(matches!(manager.refresh("").await, Err(TokenError::NoTokenProvided)));
    }

    #[tokio::test]
    async fn test_zero_ttl_tokens_do_not_expire() {
        let holder = StaticKeyHolder::new();
        let manager = manager(&holder);
        manager.set_token_ttl(0);
        assert_eq!(manager.token_ttl(), 0);

        let token = manager.generate(&AuthInfo::bearer("t")).unwrap();
        let claims = manager.decrypt_claims(&token).await.unwrap();
        assert!(claims.exp.is_none());
    }
}
