//! Transport configuration and TLS material loading.

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ClientConfig, RootCertStore};

use crate::TransportError;

/// Broker connection settings.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Broker hostname.
    pub host: String,
    /// TLS port, 8883 by default.
    pub port: u16,
    pub ca_path: PathBuf,
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    /// Application name; the client id is `<app_name>-<short random>`.
    pub app_name: String,
    pub keep_alive: Duration,
    /// Fixed base period between reconnect attempts.
    pub reconnect_period: Duration,
    /// Attempts before the session gives up and closes.
    pub max_reconnect_attempts: u32,
    pub connect_timeout: Duration,
}

impl TransportConfig {
    pub fn new(
        host: impl Into<String>,
        ca_path: impl Into<PathBuf>,
        cert_path: impl Into<PathBuf>,
        key_path: impl Into<PathBuf>,
        app_name: impl Into<String>,
    ) -> Self {
        TransportConfig {
            host: host.into(),
            port: 8883,
            ca_path: ca_path.into(),
            cert_path: cert_path.into(),
            key_path: key_path.into(),
            app_name: app_name.into(),
            keep_alive: Duration::from_secs(30),
            reconnect_period: Duration::from_secs(5),
            max_reconnect_attempts: 10,
            connect_timeout: Duration::from_secs(30),
        }
    }

    /// Build the rustls client config: TLS 1.3 only, server verification
    /// against the configured CA, and our client certificate presented
    /// for mutual authentication.
    pub fn build_tls(&self) -> Result<Arc<ClientConfig>, TransportError> {
        let mut roots = RootCertStore::empty();
        for cert in read_certs(&self.ca_path)? {
            roots.add(cert).map_err(|e| {
                TransportError::Certificate(format!(
                    "CA {} rejected: {e}",
                    self.ca_path.display()
                ))
            })?;
        }
        if roots.is_empty() {
            return Err(TransportError::Certificate(format!(
                "no CA certificates in {}",
                self.ca_path.display()
            )));
        }

        let certs = read_certs(&self.cert_path)?;
        if certs.is_empty() {
            return Err(TransportError::Certificate(format!(
                "no client certificate in {}",
                self.cert_path.display()
            )));
        }
        let key = read_key(&self.key_path)?;

        let config = ClientConfig::builder_with_protocol_versions(&[&rustls::version::TLS13])
            .with_root_certificates(roots)
            .with_client_auth_cert(certs, key)
            .map_err(|e| TransportError::Certificate(format!("client auth setup: {e}")))?;
        Ok(Arc::new(config))
    }
}

fn read_certs(path: &std::path::Path) -> Result<Vec<CertificateDer<'static>>, TransportError> {
    let file = File::open(path).map_err(|e| {
        TransportError::Certificate(format!("cannot read {}: {e}", path.display()))
    })?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TransportError::Certificate(format!("bad PEM in {}: {e}", path.display())))
}

fn read_key(path: &std::path::Path) -> Result<PrivateKeyDer<'static>, TransportError> {
    let file = File::open(path).map_err(|e| {
        TransportError::Certificate(format!("cannot read {}: {e}", path.display()))
    })?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| TransportError::Certificate(format!("bad key in {}: {e}", path.display())))?
        .ok_or_else(|| {
            TransportError::Certificate(format!("no private key in {}", path.display()))
        })
}
