//! # AuthInfo
//!
//! Credentials carried inside a token, named after the kubeconfig `users[].user`
//! fields so a decrypted token can configure a Kubernetes client directly.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Credentials used to authenticate against the Kubernetes API server
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "kebab-case")]
pub struct AuthInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Base64 PEM client certificate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_certificate_data: Option<String>,
    /// Base64 PEM client key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_key_data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub impersonate: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub impersonate_groups: Vec<String>,
}

/// Which credential an [`AuthInfo`] carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    Token,
    Basic,
    ClientCertificate,
    Anonymous,
}

impl AuthInfo {
    // Fields are assigned one by one; struct update syntax cannot move out of a
    // value that zeroizes on drop.

    pub fn bearer(token: impl Into<String>) -> Self {
        let mut info = Self::default();
        info.token = Some(token.into());
        info
    }

    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        let mut info = Self::default();
        info.username = Some(username.into());
        info.password = Some(password.into());
        info
    }

    pub fn client_certificate(certificate_data: impl Into<String>, key_data: impl Into<String>) -> Self {
        let mut info = Self::default();
        info.client_certificate_data = Some(certificate_data.into());
        info.client_key_data = Some(key_data.into());
        info
    }

    /// Impersonate `user` (and optionally `groups`) on top of the credential
    pub fn impersonating(mut self, user: impl Into<String>, groups: Vec<String>) -> Self {
        self.impersonate = Some(user.into());
        self.impersonate_groups = groups;
        self
    }

    /// Credential kind, in the precedence the API server client applies
    pub fn method(&self) -> AuthMethod {
        if self.token.is_some() {
            AuthMethod::Token
        } else if self.client_certificate_data.is_some() && self.client_key_data.is_some() {
            AuthMethod::ClientCertificate
        } else if self.username.is_some() && self.password.is_some() {
            AuthMethod::Basic
        } else {
            AuthMethod::Anonymous
        }
    }

    /// Convert to the kubeconfig representation used by `kube`
    pub fn to_kube_auth_info(&self) -> Result<kube::config::AuthInfo, serde_json::Error> {
        let groups = (!self.impersonate_groups.is_empty()).then(|| self.impersonate_groups.clone());
        serde_json::from_value(serde_json::json!({
            "token": self.token,
            "username": self.username,
            "password": self.password,
            "client-certificate-data": self.client_certificate_data,
            "client-key-data": self.client_key_data,
            "as": self.impersonate,
            "as-groups": groups,
        }))
    }

    /// Replace the credentials of a `kube` client configuration with these
    pub fn apply_to(&self, config: &mut kube::Config) -> Result<(), serde_json::Error> {
        config.auth_info = self.to_kube_auth_info()?;
        Ok(())
    }
}

impl fmt::Debug for AuthInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn redacted(value: &Option<String>) -> Option<&'static str> {
            value.as_ref().map(|_| "<redacted>")
        }
        f.debug_struct("AuthInfo")
            .field("token", &redacted(&self.token))
            .field("username", &self.username)
            .field("password", &redacted(&self.password))
            .field("client_certificate_data", &redacted(&self.client_certificate_data))
            .field("client_key_data", &redacted(&self.client_key_data))
            .field("impersonate", &self.impersonate)
            .field("impersonate_groups", &self.impersonate_groups)
            .finish()
    }
}

/// Encrypted token payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenClaims {
    #[serde(rename = "authInfo")]
    pub auth_info: AuthInfo,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub iat: DateTime<Utc>,
    /// Absent when tokens never expire
    #[serde(
        default,
        with = "chrono::serde::ts_seconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub exp: Option<DateTime<Utc>>,
}

impl TokenClaims {
    /// Claims issued at `now`, expiring `ttl_secs` later (never when 0)
    pub fn new(auth_info: AuthInfo, now: DateTime<Utc>, ttl_secs: u64) -> Self {
        let exp = (ttl_secs > 0)
            .then(|| i64::try_from(ttl_secs).ok())
            .flatten()
            .and_then(|secs| now.checked_add_signed(Duration::seconds(secs)));
        Self {
            auth_info,
            iat: now,
            exp,
        }
    }

    /// Compared at second precision, the resolution tokens carry
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.exp
            .is_some_and(|exp| now.timestamp() > exp.timestamp())
    }
}
