//! TLS material for the node-facing channel.
//!
//! The broker presents a certificate provisioned outside the process and
//! requires no client certificate. Nodes trust that certificate directly
//! rather than a public CA, mirroring how the fleet is deployed.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use std::path::Path;
use std::sync::Arc;

use crate::protocol::error::{BrokerError, Result};

/// PEM-encoded certificate chain and private key.
#[derive(Clone)]
pub struct TlsMaterial {
    pub cert_pem: Vec<u8>,
    pub key_pem: Vec<u8>,
}

impl TlsMaterial {
    pub fn new(cert_pem: impl Into<Vec<u8>>, key_pem: impl Into<Vec<u8>>) -> Self {
        Self {
            cert_pem: cert_pem.into(),
            key_pem: key_pem.into(),
        }
    }

    /// Reads the certificate chain and key from PEM files.
    pub fn from_files(cert_path: &Path, key_path: &Path) -> Result<Self> {
        let cert_pem = std::fs::read(cert_path).map_err(|e| {
            BrokerError::Tls(format!("Failed to read {}: {}", cert_path.display(), e))
        })?;
        let key_pem = std::fs::read(key_path).map_err(|e| {
            BrokerError::Tls(format!("Failed to read {}: {}", key_path.display(), e))
        })?;
        Ok(Self { cert_pem, key_pem })
    }

    /// Decodes base64-wrapped PEM blobs, as stored in deployment secrets.
    pub fn from_base64(cert_b64: &str, key_b64: &str) -> Result<Self> {
        let cert_pem = BASE64
            .decode(cert_b64.trim())
            .map_err(|e| BrokerError::Tls(format!("Invalid base64 certificate: {}", e)))?;
        let key_pem = BASE64
            .decode(key_b64.trim())
            .map_err(|e| BrokerError::Tls(format!("Invalid base64 key: {}", e)))?;
        Ok(Self { cert_pem, key_pem })
    }

    /// Loads `{prefix}_CERT_B64` and `{prefix}_KEY_B64` through `env`.
    ///
    /// Pass `|name| std::env::var(name).ok()` to read the process environment.
    pub fn from_env(prefix: &str, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let lookup = |name: String| {
            env(&name).ok_or_else(|| {
                BrokerError::Config(format!("Missing environment variable: {}", name))
            })
        };
        let cert = lookup(format!("{}_CERT_B64", prefix))?;
        let key = lookup(format!("{}_KEY_B64", prefix))?;
        Self::from_base64(&cert, &key)
    }
}

impl std::fmt::Debug for TlsMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsMaterial")
            .field("cert_pem", &format!("{} bytes", self.cert_pem.len()))
            .field("key_pem", &"*****")
            .finish()
    }
}

fn parse_certs(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>> {
    let certs = rustls_pemfile::certs(&mut &pem[..])
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| BrokerError::Tls(format!("Invalid certificate PEM: {}", e)))?;
    if certs.is_empty() {
        return Err(BrokerError::Tls("No certificates found in PEM".to_string()));
    }
    Ok(certs)
}

fn parse_key(pem: &[u8]) -> Result<PrivateKeyDer<'static>> {
    rustls_pemfile::private_key(&mut &pem[..])
        .map_err(|e| BrokerError::Tls(format!("Invalid private key PEM: {}", e)))?
        .ok_or_else(|| BrokerError::Tls("No private key found in PEM".to_string()))
}

/// Builds the broker's server config. No client authentication.
pub fn server_config(material: &TlsMaterial) -> Result<Arc<rustls::ServerConfig>> {
    let certs = parse_certs(&material.cert_pem)?;
    let key = parse_key(&material.key_pem)?;

    let config = rustls::ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()?
    .with_no_client_auth()
    .with_single_cert(certs, key)?;

    Ok(Arc::new(config))
}

/// Builds a client config whose only trust anchor is the broker's certificate.
pub fn client_config_trusting(cert_pem: &[u8]) -> Result<Arc<rustls::ClientConfig>> {
    let mut roots = rustls::RootCertStore::empty();
    for cert in parse_certs(cert_pem)? {
        roots.add(cert)?;
    }

    let config = rustls::ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()?
    .with_root_certificates(roots)
    .with_no_client_auth();

    Ok(Arc::new(config))
}
