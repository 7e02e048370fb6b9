//! Server configuration types.

mod bind;

use std::path::PathBuf;
use std::time::Duration;

pub use bind::{BindSpec, WILDCARD_HOST};

use crate::error::{Error, Result};

/// Default listen host.
pub const DEFAULT_HOSTS: &str = "127.0.0.1";
/// Default listen port.
pub const DEFAULT_PORTS: &str = "2525";
/// Default number of sessions running the protocol at once.
pub const DEFAULT_MAX_PROCESSINGS: usize = 4;
/// Default inactivity window for a command line.
pub const DEFAULT_IO_CMD_TIMEOUT: Duration = Duration::from_secs(30);
/// Default read chunk size.
pub const DEFAULT_IO_BUFFER_CHUNK_SIZE: usize = 4 * 1024;
/// Default cap on unterminated input.
pub const DEFAULT_IO_BUFFER_MAX_SIZE: usize = 1024 * 1024;

/// How line terminators are checked and normalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CrlfMode {
    /// Strip every CR and LF; messages are stored with CRLF.
    #[default]
    Ensure,
    /// Accept CRLF or LF and keep whichever the client used in message data.
    Leave,
    /// Require CRLF and reject bare CR inside a line.
    Strict,
}

/// Whether AUTH is offered and required.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthMode {
    /// AUTH is not offered.
    #[default]
    Forbidden,
    /// AUTH is offered.
    Optional,
    /// MAIL, RCPT and DATA require a successful AUTH.
    Required,
}

/// Whether STARTTLS is offered and required.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TlsMode {
    /// STARTTLS is not offered.
    #[default]
    Forbidden,
    /// STARTTLS is offered.
    Optional,
    /// Every transaction command requires an encrypted session.
    Required,
}

/// How repeated PROXY preamble lines are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProxyPolicy {
    /// One PROXY line; a second one aborts the connection.
    #[default]
    Single,
    /// Several PROXY lines from chained relays; every hop is recorded.
    Chained,
}

/// Cipher preset for modern clients (AEAD suites with forward secrecy).
pub const TLS_CIPHERS_ADVANCED: &str = "ADVANCED";
/// Cipher preset that adds TLS 1.2 ChaCha20 suites for older clients.
pub const TLS_CIPHERS_BROAD_COMPATIBILITY: &str = "BROAD_COMPATIBILITY";
/// TLS 1.2 and newer.
pub const TLS_PROTOCOLS_DEFAULT: &str = "TLSv1_2";

/// STARTTLS settings.
#[derive(Debug, Clone)]
pub struct TlsConfig {
    /// TLS mode.
    pub mode: TlsMode,
    /// PEM certificate chain; a self-signed certificate is generated if absent.
    pub cert_path: Option<PathBuf>,
    /// PEM private key matching `cert_path`.
    pub key_path: Option<PathBuf>,
    /// Common name for a generated certificate.
    pub cert_cn: Option<String>,
    /// Subject alternative names for a generated certificate.
    pub cert_san: Vec<String>,
    /// Cipher preset or `:`-separated suite names.
    pub ciphers: String,
    /// `:`-separated protocol versions (`TLSv1_2`, `TLSv1_3`).
    pub protocols: String,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            mode: TlsMode::Forbidden,
            cert_path: None,
            key_path: None,
            cert_cn: None,
            cert_san: Vec::new(),
            ciphers: TLS_CIPHERS_ADVANCED.to_string(),
            protocols: TLS_PROTOCOLS_DEFAULT.to_string(),
        }
    }
}

/// SMTP server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Hosts to listen on.
    pub hosts: Vec<String>,
    /// Port entries, one per host (the last is reused).
    pub ports: Vec<Vec<u16>>,
    /// Sessions allowed to run the protocol at once.
    pub max_processings: usize,
    /// Open connections allowed at once; unbounded if `None`.
    pub max_connections: Option<usize>,
    /// Line terminator policy.
    pub crlf_mode: CrlfMode,
    /// Resolve peer and local host names with reverse DNS.
    pub reverse_dns: bool,
    /// Inactivity window for a complete line; disabled if `None`.
    pub io_cmd_timeout: Option<Duration>,
    /// Bytes requested per read.
    pub io_buffer_chunk_size: usize,
    /// Cap on buffered bytes without a line feed; disabled if `None`.
    pub io_buffer_max_size: Option<usize>,
    /// Advertise and allow PIPELINING.
    pub pipelining: bool,
    /// Advertise and allow 8BITMIME and SMTPUTF8.
    pub internationalization: bool,
    /// Accept a PROXY v1 preamble.
    pub proxy_extension: bool,
    /// Repeated PROXY line policy.
    pub proxy_policy: ProxyPolicy,
    /// AUTH mode.
    pub auth_mode: AuthMode,
    /// STARTTLS settings.
    pub tls: TlsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hosts: vec![DEFAULT_HOSTS.to_string()],
            ports: vec![vec![2525]],
            max_processings: DEFAULT_MAX_PROCESSINGS,
            max_connections: None,
            crlf_mode: CrlfMode::default(),
            reverse_dns: false,
            io_cmd_timeout: Some(DEFAULT_IO_CMD_TIMEOUT),
            io_buffer_chunk_size: DEFAULT_IO_BUFFER_CHUNK_SIZE,
            io_buffer_max_size: Some(DEFAULT_IO_BUFFER_MAX_SIZE),
            pipelining: false,
            internationalization: false,
            proxy_extension: false,
            proxy_policy: ProxyPolicy::default(),
            auth_mode: AuthMode::default(),
            tls: TlsConfig::default(),
        }
    }
}

impl Config {
    /// Creates a configuration builder.
    #[must_use]
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    /// Returns every host with the ports it listens on.
    #[must_use]
    pub fn bind_specs(&self) -> Vec<BindSpec> {
        bind::pair(&self.hosts, &self.ports)
    }

    /// Returns true if STARTTLS is offered at all.
    #[must_use]
    pub fn tls_enabled(&self) -> bool {
        self.tls.mode != TlsMode::Forbidden
    }
}

/// Builder for server configuration.
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    hosts: String,
    ports: String,
    config: Config,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigBuilder {
    /// Creates a builder with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            hosts: DEFAULT_HOSTS.to_string(),
            ports: DEFAULT_PORTS.to_string(),
            config: Config::default(),
        }
    }

    /// Sets the comma-separated host list (`*` for all interfaces).
    #[must_use]
    pub fn hosts(mut self, hosts: impl Into<String>) -> Self {
        self.hosts = hosts.into();
        self
    }

    /// Sets the comma-separated port list (`2525:3535, 4545`).
    #[must_use]
    pub fn ports(mut self, ports: impl Into<String>) -> Self {
        self.ports = ports.into();
        self
    }

    /// Sets the number of sessions that run the protocol at once.
    #[must_use]
    pub const fn max_processings(mut self, max: usize) -> Self {
        self.config.max_processings = max;
        self
    }

    /// Sets the number of open connections allowed at once.
    #[must_use]
    pub const fn max_connections(mut self, max: Option<usize>) -> Self {
        self.config.max_connections = max;
        self
    }

    /// Sets the line terminator policy.
    #[must_use]
    pub const fn crlf_mode(mut self, mode: CrlfMode) -> Self {
        self.config.crlf_mode = mode;
        self
    }

    /// Enables reverse DNS lookups of local and remote addresses.
    #[must_use]
    pub const fn reverse_dns(mut self, enabled: bool) -> Self {
        self.config.reverse_dns = enabled;
        self
    }

    /// Sets the inactivity window for a complete line.
    #[must_use]
    pub const fn io_cmd_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.io_cmd_timeout = timeout;
        self
    }

    /// Sets the number of bytes requested per read.
    #[must_use]
    pub const fn io_buffer_chunk_size(mut self, size: usize) -> Self {
        self.config.io_buffer_chunk_size = size;
        self
    }

    /// Sets the cap on buffered bytes without a line feed.
    #[must_use]
    pub const fn io_buffer_max_size(mut self, size: Option<usize>) -> Self {
        self.config.io_buffer_max_size = size;
        self
    }

    /// Enables PIPELINING.
    #[must_use]
    pub const fn pipelining(mut self, enabled: bool) -> Self {
        self.config.pipelining = enabled;
        self
    }

    /// Enables 8BITMIME and SMTPUTF8.
    #[must_use]
    pub const fn internationalization(mut self, enabled: bool) -> Self {
        self.config.internationalization = enabled;
        self
    }

    /// Enables the PROXY preamble.
    #[must_use]
    pub const fn proxy_extension(mut self, enabled: bool) -> Self {
        self.config.proxy_extension = enabled;
        self
    }

    /// Sets the repeated PROXY line policy.
    #[must_use]
    pub const fn proxy_policy(mut self, policy: ProxyPolicy) -> Self {
        self.config.proxy_policy = policy;
        self
    }

    /// Sets the AUTH mode.
    #[must_use]
    pub const fn auth_mode(mut self, mode: AuthMode) -> Self {
        self.config.auth_mode = mode;
        self
    }

    /// Sets the TLS mode.
    #[must_use]
    pub const fn tls_mode(mut self, mode: TlsMode) -> Self {
        self.config.tls.mode = mode;
        self
    }

    /// Sets PEM certificate and key files.
    #[must_use]
    pub fn tls_cert_files(mut self, cert: impl Into<PathBuf>, key: impl Into<PathBuf>) -> Self {
        self.config.tls.cert_path = Some(cert.into());
        self.config.tls.key_path = Some(key.into());
        self
    }

    /// Sets the common name and alternative names of a generated certificate.
    #[must_use]
    pub fn tls_cert_names(mut self, cn: impl Into<String>, san: Vec<String>) -> Self {
        self.config.tls.cert_cn = Some(cn.into());
        self.config.tls.cert_san = san;
        self
    }

    /// Sets the cipher preset or suite list.
    #[must_use]
    pub fn tls_ciphers(mut self, ciphers: impl Into<String>) -> Self {
        self.config.tls.ciphers = ciphers.into();
        self
    }

    /// Sets the protocol version list.
    #[must_use]
    pub fn tls_protocols(mut self, protocols: impl Into<String>) -> Self {
        self.config.tls.protocols = protocols.into();
        self
    }

    /// Validates and builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for malformed host or port lists, a zero
    /// processing or chunk size, a connection limit below the processing
    /// limit, or a certificate without a key (or the reverse).
    pub fn build(self) -> Result<Config> {
        let mut config = self.config;
        config.hosts = bind::parse_hosts(&self.hosts)?;
        config.ports = bind::parse_ports(&self.ports)?;

        if config.max_processings == 0 {
            return Err(Error::config("max_processings must be at least 1"));
        }
        if let Some(max_connections) = config.max_connections
            && max_connections < config.max_processings
        {
            return Err(Error::config(format!(
                "max_connections ({max_connections}) must not be less than max_processings ({})",
                config.max_processings
            )));
        }
        if config.io_buffer_chunk_size == 0 {
            return Err(Error::config("io_buffer_chunk_size must be at least 1"));
        }
        if config.tls.cert_path.is_some() != config.tls.key_path.is_some() {
            return Err(Error::config(
                "TLS certificate and key must be configured together",
            ));
        }
        Ok(config)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::builder().build().unwrap();
        assert_eq!(config.hosts, vec!["127.0.0.1"]);
        assert_eq!(config.ports, vec![vec![2525]]);
        assert_eq!(config.max_processings, 4);
        assert_eq!(config.max_connections, None);
        assert_eq!(config.crlf_mode, CrlfMode::Ensure);
        assert_eq!(config.io_cmd_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.io_buffer_chunk_size, 4096);
        assert_eq!(config.io_buffer_max_size, Some(1_048_576));
        assert!(!config.pipelining);
        assert!(!config.internationalization);
        assert!(!config.proxy_extension);
        assert_eq!(config.auth_mode, AuthMode::Forbidden);
        assert_eq!(config.tls.mode, TlsMode::Forbidden);
        assert!(!config.tls_enabled());
    }

    #[test]
    fn test_builder_sets_fields() {
        let config = Config::builder()
            .hosts("127.0.0.1, ::1")
            .ports("2525:3535, 4545")
            .max_processings(2)
            .max_connections(Some(10))
            .crlf_mode(CrlfMode::Strict)
            .pipelining(true)
            .auth_mode(AuthMode::Required)
            .tls_mode(TlsMode::Optional)
            .build()
            .unwrap();

        assert_eq!(config.max_processings, 2);
        assert_eq!(config.max_connections, Some(10));
        assert!(config.tls_enabled());
        assert_eq!(
            config.bind_specs(),
            vec![
                BindSpec { host: "127.0.0.1".to_string(), ports: vec![2525, 3535] },
                BindSpec { host: "::1".to_string(), ports: vec![4545] },
            ]
        );
    }

    #[test]
    fn test_connections_below_processings_rejected() {
        let result = Config::builder()
            .max_processings(4)
            .max_connections(Some(3))
            .build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_zero_limits_rejected() {
        assert!(Config::builder().max_processings(0).build().is_err());
        assert!(Config::builder().io_buffer_chunk_size(0).build().is_err());
    }

    #[test]
    fn test_cert_without_key_rejected() {
        let mut builder = Config::builder().tls_mode(TlsMode::Optional);
        builder.config.tls.cert_path = Some(PathBuf::from("cert.pem"));
        assert!(builder.build().is_err());
    }

    #[test]
    fn test_bad_port_list_rejected() {
        assert!(Config::builder().ports("2525,,3535").build().is_err());
    }
}
