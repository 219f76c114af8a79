//! Multi-host OIDC gateway server.
//!
//! This crate turns a validated [`gatekeep_config::Config`] into a running gateway:
//!
//! - [`Gateway`] builds one [`HostHandler`] per virtual host and publishes them as an
//!   atomic [`RoutingTable`] swap
//! - [`HostHandler`] answers login, callback and logout, and proxies location paths
//!   through a [`transport`] chain with round-robin failover
//! - [`watch_config`] and [`tls::watch_certificates`] reload config and certificates
//!   without restarting the listener
//!
//! [`run`] wires it all to an `axum_server` listener with graceful shutdown.

pub mod config;
pub mod context;
pub mod error;
pub mod host;
pub mod page;
pub mod registry;
pub mod router;
pub mod tls;
pub mod transport;
pub mod watch;

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum_server::Handle;
use axum_server::tls_rustls::RustlsConfig;
use gatekeep_config::load_config;
use tracing::info;

pub use config::GatewayOptions;
pub use context::{DisposeHandle, DisposeRegistry, Gateway};
pub use error::{ProxyError, Result};
pub use host::HostHandler;
pub use page::NotFoundPage;
pub use registry::{Endpoint, Registry, RegistryError};
pub use router::{GatewayRouter, RoutingTable, request_host_key};
pub use watch::{WatchHandle, watch_config};

/// Serve the config at `config_path` until ctrl-c or SIGTERM.
///
/// The config is validated up front and a failure is returned before anything binds.
/// Certificates are used only when both files exist; otherwise the listener is plain
/// HTTP. After the listener drains, every session backend is closed.
pub async fn run(config_path: &Path, options: GatewayOptions) -> Result<()> {
    let config = load_config(config_path)?;
    let addr = options.bind_address.unwrap_or_else(|| config.bind_address());
    let grace = options.shutdown_grace;

    let tls = match tls::tls_files(&config) {
        Some((cert, key)) => {
            let resolver = Arc::new(tls::CertResolver::load(&cert, &key)?);
            let rustls = RustlsConfig::from_config(Arc::new(tls::server_config(resolver.clone())?));
            let watcher =
                tls::watch_certificates(resolver, cert, key, options.watch_debounce)?;
            Some((rustls, watcher))
        }
        None => None,
    };

    let gateway = Arc::new(Gateway::new(options, tls.is_some()));
    gateway.apply(&config).await?;
    let _config_watcher = watch_config(gateway.clone(), config_path.to_path_buf())?;

    let handle = Handle::new();
    tokio::spawn(shutdown_signal(handle.clone(), grace));

    let app = gateway
        .app()
        .into_make_service_with_connect_info::<SocketAddr>();
    let served = match tls {
        Some((rustls, _cert_watcher)) => {
            info!(%addr, "gateway listening (https)");
            axum_server::bind_rustls(addr, rustls)
                .handle(handle)
                .serve(app)
                .await
        }
        None => {
            info!(%addr, "gateway listening (http)");
            axum_server::bind(addr).handle(handle).serve(app).await
        }
    };

    gateway.shutdown().await;
    served?;
    info!("gateway stopped");
    Ok(())
}

async fn shutdown_signal(handle: Handle, grace: Duration) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!(grace_secs = grace.as_secs(), "shutdown requested, draining connections");
    handle.graceful_shutdown(Some(grace));
}
