//! # Initialization
//!
//! Service startup: rustls setup, tracing, metrics, HTTP server, and the key holder
//! stack (synchronizer, key holder, supervisor, token manager).

use crate::config::{self, AuthConfig, KeyStoreBackend, ServerConfig};
use crate::constants;
use crate::jwe::{JweTokenManager, KeyHolder, RsaKeyHolder, TokenManager};
use crate::observability;
use crate::server::{start_server, ServerState};
use crate::sync::{KubeSecretClient, MemoryObjectClient, ObjectClient, Overwatch, RestartPolicy, Synchronizer};
use anyhow::{anyhow, Context, Result};
use k8s_openapi::api::core::v1::Secret;
use kube::Client;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{error, info, info_span, warn, Instrument};

/// Everything the binary needs to run and shut down the service
pub struct InitializationResult {
    pub overwatch: Arc<Overwatch>,
    pub token_manager: Arc<dyn TokenManager>,
    pub server_state: Arc<ServerState>,
    pub server_handle: JoinHandle<()>,
}

impl std::fmt::Debug for InitializationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializationResult")
            .field("overwatch", &self.overwatch)
            .field("server_state", &self.server_state)
            .finish_non_exhaustive()
    }
}

/// Initialize the service runtime
///
/// - rustls crypto provider setup
/// - tracing subscriber setup
/// - metrics registration
/// - HTTP server startup
/// - key holder stack for the configured backend
pub async fn initialize() -> Result<InitializationResult> {
    // Must happen before any TLS client is built
    if let Err(provider) = rustls::crypto::ring::default_provider().install_default() {
        warn!(?provider, "rustls crypto provider was already installed");
    }

    init_tracing()?;

    let (auth_config, supervisor_config, server_config) = config::load_config();
    info!("Starting dashboard auth v{}", env!("CARGO_PKG_VERSION"));
    info!(
        namespace = %auth_config.namespace,
        secret = %auth_config.secret_name,
        backend = ?auth_config.backend,
        sync_mode = ?auth_config.sync_mode(),
        token_ttl_secs = auth_config.token_ttl_secs,
        "Loaded configuration"
    );

    observability::metrics::register_metrics()?;

    let server_state = ServerState::new();
    let server_state_clone = Arc::clone(&server_state);
    let server_port = server_config.metrics_port;
    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(server_port, server_state_clone).await {
            error!("HTTP server error: {:#}", e);
        }
    });
    wait_for_server_ready(&server_state, &server_handle, &server_config).await?;

    let overwatch = Overwatch::new(supervisor_config);
    let token_manager = match auth_config.backend {
        KeyStoreBackend::Kubernetes => {
            let client = Client::try_default()
                .await
                .context("Failed to create Kubernetes client")?;
            bootstrap(Arc::new(KubeSecretClient::new(client)), &auth_config, &overwatch).await?
        }
        KeyStoreBackend::Memory => {
            warn!("Using the in-memory key store; tokens are only valid for this replica");
            bootstrap(
                Arc::new(MemoryObjectClient::<Secret>::new()),
                &auth_config,
                &overwatch,
            )
            .await?
        }
    };

    server_state.install_token_manager(Arc::clone(&token_manager));
    info!("Token manager ready");

    Ok(InitializationResult {
        overwatch,
        token_manager,
        server_state,
        server_handle,
    })
}

/// Tracing with `RUST_LOG`, defaulting to this crate at info
pub fn init_tracing() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| constants::DEFAULT_LOG_FILTER.into()),
        )
        .try_init()
        .map_err(|e| anyhow!("Failed to initialize tracing: {e}"))
}

/// Build the key holder stack over `client` and return the token manager.
///
/// The synchronizer is started and supervised only after the key holder has
/// adopted or published a key, so no token is served without one.
pub async fn bootstrap<C>(
    client: Arc<C>,
    config: &AuthConfig,
    overwatch: &Overwatch,
) -> Result<Arc<dyn TokenManager>>
where
    C: ObjectClient<Object = Secret>,
{
    let synchronizer = Synchronizer::new(
        client,
        &config.namespace,
        &config.secret_name,
        config.sync_mode(),
    );

    let key_holder_span = info_span!(
        "startup.key_holder",
        secret.namespace = %config.namespace,
        secret.name = %config.secret_name,
        key_bits = config.key_bits
    );
    let key_holder = RsaKeyHolder::new(Arc::clone(&synchronizer), config.key_holder_config())
        .instrument(key_holder_span)
        .await
        .context("Failed to initialize encryption key holder")?;

    overwatch
        .register_synchronizer(synchronizer, RestartPolicy::AlwaysRestart)
        .context("Failed to supervise key holder synchronizer")?;

    let token_manager = JweTokenManager::new(key_holder as Arc<dyn KeyHolder>);
    token_manager.set_token_ttl(config.token_ttl_secs);
    Ok(Arc::new(token_manager))
}

/// Wait for the HTTP server to bind its listener
async fn wait_for_server_ready(
    server_state: &Arc<ServerState>,
    server_handle: &JoinHandle<()>,
    config: &ServerConfig,
) -> Result<()> {
    let startup_timeout = Duration::from_secs(config.startup_timeout_secs);
    let poll_interval = Duration::from_millis(config.poll_interval_ms);
    let start_time = Instant::now();

    loop {
        if server_handle.is_finished() {
            return Err(anyhow!("HTTP server failed to start"));
        }

        if server_state.is_listening.load(Ordering::Relaxed) {
            info!("HTTP server is accepting connections");
            return Ok(());
        }

        if start_time.elapsed() > startup_timeout {
            return Err(anyhow!(
                "HTTP server failed to start listening within {} seconds",
                startup_timeout.as_secs()
            ));
        }

        tokio::time::sleep(poll_interval).await;
    }
}
