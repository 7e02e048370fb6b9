//! TLS transport for STARTTLS.
//!
//! A [`TlsTransport`] owns one immutable rustls server configuration and is
//! shared by every session. It is built either from PEM files or from a
//! freshly generated self-signed certificate.

mod certificate;

use std::fmt;
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;

use rustls::crypto::CryptoProvider;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ServerConfig, SupportedCipherSuite, SupportedProtocolVersion};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::TlsAcceptor;
use tokio_rustls::server::TlsStream;

pub use certificate::{
    CertificateNames, LOCALHOST_COMMON_NAME, SELF_SIGNED_VALIDITY_DAYS, generate_self_signed,
};

use crate::config::{TLS_CIPHERS_ADVANCED, TLS_CIPHERS_BROAD_COMPATIBILITY, TlsConfig};
use crate::error::{Error, Result};

const ADVANCED_SUITES: &[&str] = &[
    "TLS13_AES_256_GCM_SHA384",
    "TLS13_AES_128_GCM_SHA256",
    "TLS13_CHACHA20_POLY1305_SHA256",
    "TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384",
    "TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256",
    "TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384",
    "TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256",
];

const COMPATIBILITY_SUITES: &[&str] = &[
    "TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256",
    "TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256",
];

/// Server-side TLS context shared by all sessions.
#[derive(Clone)]
pub struct TlsTransport {
    acceptor: TlsAcceptor,
    common_name: Option<String>,
}

impl fmt::Debug for TlsTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsTransport")
            .field("common_name", &self.common_name)
            .finish_non_exhaustive()
    }
}

impl TlsTransport {
    /// Builds the transport described by `tls`.
    ///
    /// Without certificate files, a self-signed certificate is generated for
    /// the configured names, or for `hosts` and `addresses` if none are set.
    ///
    /// # Errors
    ///
    /// Returns an error if the certificate cannot be loaded or generated, or
    /// the cipher and protocol lists are invalid.
    pub fn from_config(tls: &TlsConfig, hosts: &[String], addresses: &[IpAddr]) -> Result<Self> {
        if let (Some(cert), Some(key)) = (&tls.cert_path, &tls.key_path) {
            return Self::from_pem_files(cert, key, &tls.ciphers, &tls.protocols);
        }
        let names = tls.cert_cn.as_deref().map_or_else(
            || CertificateNames::derive(hosts, addresses),
            |cn| CertificateNames::explicit(cn, &tls.cert_san),
        );
        Self::self_signed(&names, &tls.ciphers, &tls.protocols)
    }

    /// Loads a PEM certificate chain and private key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a file is missing or holds no usable PEM
    /// data, and [`Error::Tls`] if rustls rejects the material.
    pub fn from_pem_files(cert: &Path, key: &Path, ciphers: &str, protocols: &str) -> Result<Self> {
        for path in [cert, key] {
            if !path.is_file() {
                return Err(Error::config(format!(
                    "{} does not exist or is not a regular file",
                    path.display()
                )));
            }
        }

        let cert_pem = std::fs::read(cert)?;
        let certs = CertificateDer::pem_slice_iter(&cert_pem)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| {
                Error::config(format!("loading certificates from {}: {e}", cert.display()))
            })?;
        if certs.is_empty() {
            return Err(Error::config(format!(
                "no certificate found in {}",
                cert.display()
            )));
        }

        let key_pem = std::fs::read(key)?;
        let key = PrivateKeyDer::from_pem_slice(&key_pem)
            .map_err(|e| {
                Error::config(format!("loading private key from {}: {e}", key.display()))
            })?;

        let config = server_config(certs, key, ciphers, protocols)?;
        Ok(Self {
            acceptor: TlsAcceptor::from(config),
            common_name: None,
        })
    }

    /// Generates a self-signed certificate for `names`.
    ///
    /// # Errors
    ///
    /// Returns an error if generation fails or the cipher and protocol lists
    /// are invalid.
    pub fn self_signed(names: &CertificateNames, ciphers: &str, protocols: &str) -> Result<Self> {
        let (certs, key) = generate_self_signed(names)?;
        let config = server_config(certs, key, ciphers, protocols)?;
        tracing::info!(
            common_name = %names.common_name,
            alt_names = ?names.alt_names,
            "generated self-signed certificate"
        );
        Ok(Self {
            acceptor: TlsAcceptor::from(config),
            common_name: Some(names.common_name.clone()),
        })
    }

    /// Common name of a generated certificate.
    #[must_use]
    pub fn common_name(&self) -> Option<&str> {
        self.common_name.as_deref()
    }

    /// Performs the server-side handshake over `stream`.
    ///
    /// # Errors
    ///
    /// Returns an error if the handshake fails.
    pub async fn accept<IO>(&self, stream: IO) -> Result<TlsStream<IO>>
    where
        IO: AsyncRead + AsyncWrite + Unpin,
    {
        Ok(self.acceptor.accept(stream).await?)
    }
}

fn server_config(
    certs: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
    ciphers: &str,
    protocols: &str,
) -> Result<Arc<ServerConfig>> {
    let mut provider = rustls::crypto::aws_lc_rs::default_provider();
    provider.cipher_suites = cipher_suites(ciphers, &provider)?;
    let versions = protocol_versions(protocols)?;

    let config = ServerConfig::builder_with_provider(Arc::new(provider))
        .with_protocol_versions(&versions)?
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    Ok(Arc::new(config))
}

/// Resolves a cipher preset or a `:`-separated list of suite names.
fn cipher_suites(spec: &str, provider: &CryptoProvider) -> Result<Vec<SupportedCipherSuite>> {
    let names: Vec<&str> = match spec.trim() {
        "" | TLS_CIPHERS_ADVANCED => ADVANCED_SUITES.to_vec(),
        TLS_CIPHERS_BROAD_COMPATIBILITY => ADVANCED_SUITES
            .iter()
            .chain(COMPATIBILITY_SUITES)
            .copied()
            .collect(),
        list => list.split(':').map(str::trim).collect(),
    };

    names
        .into_iter()
        .map(|name| {
            provider
                .cipher_suites
                .iter()
                .find(|suite| format!("{:?}", suite.suite()) == name)
                .copied()
                .ok_or_else(|| Error::config(format!("unknown TLS cipher suite {name:?}")))
        })
        .collect()
}

/// Resolves a `:`-separated list of `TLSv1_2` / `TLSv1_3`.
///
/// `TLSv1_2` means TLS 1.2 as the minimum, so it also enables TLS 1.3.
fn protocol_versions(spec: &str) -> Result<Vec<&'static SupportedProtocolVersion>> {
    let mut versions: Vec<&'static SupportedProtocolVersion> = Vec::new();
    for name in spec.split(':').map(str::trim).filter(|name| !name.is_empty()) {
        let wanted: Vec<&'static SupportedProtocolVersion> = match name {
            "TLSv1_2" => vec![&rustls::version::TLS13, &rustls::version::TLS12],
            "TLSv1_3" => vec![&rustls::version::TLS13],
            other => {
                return Err(Error::config(format!(
                    "unknown TLS protocol version {other:?}"
                )));
            }
        };
        for version in wanted {
            if !versions.iter().any(|v| v.version == version.version) {
                versions.push(version);
            }
        }
    }
    if versions.is_empty() {
        return Err(Error::config("no TLS protocol version configured"));
    }
    Ok(versions)
}
