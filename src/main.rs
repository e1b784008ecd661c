//! # Dashboard Auth
//!
//! Issues and refreshes the encrypted bearer tokens the Kubernetes dashboard hands to
//! its users.
//!
//! ## Overview
//!
//! 1. **Key holder** - An RSA key pair shared by every replica through the
//!    `kubernetes-dashboard-key-holder` Secret, re-created if deleted and repaired if
//!    corrupted
//! 2. **Tokens** - `AuthInfo` credentials encrypted as JWE (RSA-OAEP-256 + A256GCM)
//!    with an expiry inside the encrypted payload
//! 3. **Supervision** - The Secret synchronizer is restarted with backoff when its
//!    watch fails; an unrecoverable failure stops the process
//!
//! Health probes, metrics and the token refresh API are served over HTTP.

use anyhow::{anyhow, Context, Result};
use dashboard_auth::runtime::initialization::initialize;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let mut runtime = initialize().await?;

    let outcome = tokio::select! {
        result = shutdown_signal() => {
            result?;
            info!("Shutdown signal received");
            Ok(())
        }
        message = runtime.overwatch.wait_fatal() => {
            error!(error = %message, "Fatal synchronizer failure, exiting");
            Err(anyhow!("fatal synchronizer failure: {message}"))
        }
        _ = &mut runtime.server_handle => Err(anyhow!("HTTP server stopped unexpectedly")),
    };

    runtime.overwatch.shutdown();
    runtime.server_handle.abort();
    outcome
}

async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut terminate =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result.context("Failed to listen for Ctrl+C")?,
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    Ok(())
}
