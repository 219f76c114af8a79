//! TLS termination with hot-swappable certificates.
//!
//! The listener's rustls config resolves its certificate through [`CertResolver`] on
//! every handshake. Reloading swaps the key pair in place, so new connections pick up
//! a rotated certificate without restarting the listener.

use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use gatekeep_config::Config;
use rustls::pki_types::CertificateDer;
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;

use crate::error::{ProxyError, Result};
use crate::watch::{FileWatcher, WatchHandle};

/// Certificate and key paths, when both are configured and both files exist.
///
/// Anything else means plaintext HTTP.
pub fn tls_files(config: &Config) -> Option<(PathBuf, PathBuf)> {
    let (cert, key) = config.tls_paths()?;
    if cert.is_file() && key.is_file() {
        Some((cert.to_path_buf(), key.to_path_buf()))
    } else {
        tracing::warn!(
            cert = %cert.display(),
            key = %key.display(),
            "certificate files not found, serving plain HTTP"
        );
        None
    }
}

/// Read a PEM certificate chain and private key.
pub fn load_certified_key(cert_path: &Path, key_path: &Path) -> Result<CertifiedKey> {
    let certs: Vec<CertificateDer<'static>> = {
        let mut reader = BufReader::new(std::fs::File::open(cert_path)?);
        rustls_pemfile::certs(&mut reader).collect::<std::io::Result<_>>()?
    };
    if certs.is_empty() {
        return Err(ProxyError::tls(format!(
            "no certificates in {}",
            cert_path.display()
        )));
    }

    let key = {
        let mut reader = BufReader::new(std::fs::File::open(key_path)?);
        rustls_pemfile::private_key(&mut reader)?
            .ok_or_else(|| ProxyError::tls(format!("no private key in {}", key_path.display())))?
    };
    let signing_key = rustls::crypto::aws_lc_rs::sign::any_supported_type(&key)
        .map_err(|e| ProxyError::tls(format!("unsupported private key: {}", e)))?;

    Ok(CertifiedKey::new(certs, signing_key))
}

/// Serves whichever key pair was loaded last.
#[derive(Debug)]
pub struct CertResolver {
    current: ArcSwap<CertifiedKey>,
}

impl CertResolver {
    /// Load the initial key pair.
    pub fn load(cert_path: &Path, key_path: &Path) -> Result<Self> {
        Ok(Self {
            current: ArcSwap::from_pointee(load_certified_key(cert_path, key_path)?),
        })
    }

    /// Replace the key pair. On error the previous one stays in use.
    pub fn reload(&self, cert_path: &Path, key_path: &Path) -> Result<()> {
        let key = load_certified_key(cert_path, key_path)?;
        self.current.store(Arc::new(key));
        Ok(())
    }

    pub fn current(&self) -> Arc<CertifiedKey> {
        self.current.load_full()
    }
}

impl ResolvesServerCert for CertResolver {
    fn resolve(&self, _client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        Some(self.current.load_full())
    }
}

/// Rustls server config resolving certificates through `resolver`.
pub fn server_config(resolver: Arc<CertResolver>) -> Result<rustls::ServerConfig> {
    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
    let mut config = rustls::ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| ProxyError::tls(e.to_string()))?
        .with_no_client_auth()
        .with_cert_resolver(resolver);
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    Ok(config)
}

/// Reload the key pair whenever either file changes.
pub fn watch_certificates(
    resolver: Arc<CertResolver>,
    cert_path: PathBuf,
    key_path: PathBuf,
    debounce: Duration,
) -> Result<WatchHandle> {
    let (watcher, mut changes) =
        FileWatcher::new(&[cert_path.clone(), key_path.clone()], debounce)?;

    let task = tokio::spawn(async move {
        while changes.recv().await.is_some() {
            match resolver.reload(&cert_path, &key_path) {
                Ok(()) => tracing::info!(cert = %cert_path.display(), "certificate reloaded"),
                Err(e) => {
                    tracing::error!(error = %e, "certificate reload failed, keeping previous certificate")
                }
            }
        }
    });

    Ok(WatchHandle::new(watcher, task))
}
