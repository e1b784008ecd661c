//! # Metrics Module
//!
//! Prometheus metrics, organized by responsibility.
//!
//! ## Sub-modules
//!
//! - `registry` - Metrics registry setup, registration and text exposition
//! - `token_metrics` - Token issuance and rejection
//! - `sync_metrics` - Key holder secret synchronization and supervision

pub mod registry;
pub mod sync_metrics;
pub mod token_metrics;

pub use registry::*;
pub use sync_metrics::*;
pub use token_metrics::*;
