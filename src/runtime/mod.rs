//! # Runtime Module
//!
//! Startup wiring plus the retry and restart policies used by the key holder and
//! the supervisor.

pub mod backoff;
pub mod error_policy;
pub mod initialization;

pub use initialization::*;
