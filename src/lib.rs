//! Dashboard Auth Library
//!
//! Encrypted bearer tokens for the Kubernetes dashboard, backed by an RSA key pair
//! shared between replicas through a Kubernetes Secret.
//! Tests are included in the module files and under `tests/`.

pub mod config;
pub mod constants;
pub mod jwe;
pub mod observability;
pub mod runtime;
pub mod server;
pub mod sync;

pub use jwe::{AuthInfo, JweTokenManager, TokenError, TokenManager};
