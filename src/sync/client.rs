//! # Object Client
//!
//! The backend object store the synchronizer mirrors. Implementations exist for the
//! Kubernetes API server and for a process-local store.

use super::event::EventSource;
use async_trait::async_trait;
use kube::Resource;
use std::fmt;
use thiserror::Error;

/// Errors returned by an object store backend
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error("object {namespace}/{name} not found")]
    NotFound { namespace: String, name: String },

    #[error("object {namespace}/{name} already exists")]
    AlreadyExists { namespace: String, name: String },

    #[error("conflict writing {namespace}/{name}: {message}")]
    Conflict {
        namespace: String,
        name: String,
        message: String,
    },

    #[error("API error {code} ({reason}): {message}")]
    Api {
        code: u16,
        reason: String,
        message: String,
    },

    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

impl ClientError {
    pub fn not_found(namespace: &str, name: &str) -> Self {
        Self::NotFound {
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    pub fn already_exists(namespace: &str, name: &str) -> Self {
        Self::AlreadyExists {
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    /// HTTP-like status code for error classification
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::NotFound { .. } => Some(404),
            Self::AlreadyExists { .. } | Self::Conflict { .. } => Some(409),
            Self::Api { code, .. } => Some(*code),
            Self::Unavailable(_) => None,
        }
    }
}

/// Access to exactly one kind of namespaced object in a backend store.
///
/// The synchronizer only ever addresses one named object through this trait, but
/// the trait itself is not limited to that.
#[async_trait]
pub trait ObjectClient: Send + Sync + 'static {
    type Object: Resource + Clone + PartialEq + fmt::Debug + Send + Sync + 'static;

    async fn get(&self, namespace: &str, name: &str) -> Result<Self::Object, ClientError>;

    /// Create the object. Fails with [`ClientError::AlreadyExists`] when another
    /// writer created it first; creation is atomic in every backend.
    async fn create(
        &self,
        namespace: &str,
        object: &Self::Object,
    ) -> Result<Self::Object, ClientError>;

    async fn update(
        &self,
        namespace: &str,
        object: &Self::Object,
    ) -> Result<Self::Object, ClientError>;

    /// Delete the object immediately (zero grace period).
    async fn delete(&self, namespace: &str, name: &str) -> Result<(), ClientError>;

    /// Open a native watch on the named object.
    async fn watch(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Box<dyn EventSource<Self::Object>>, ClientError>;
}
