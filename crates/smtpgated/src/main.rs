//! `smtpgated` - SMTP daemon on top of the smtpgate engine
//!
//! Settings come from `SMTPGATE_*` environment variables; received mail is
//! logged and dropped.

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context as _, bail};
use smtpgate::{AuthMode, Config, CrlfMode, LoggingHandler, ProxyPolicy, Server, TlsMode};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Time given to open sessions when stopping.
const STOP_WAIT: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "smtpgate=info,smtpgated=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting smtpgated");

    let config = config_from_env()?;
    let mut server = Server::new(config, LoggingHandler);
    server.start().await.context("starting SMTP server")?;
    if let Some(cn) = server.tls_common_name() {
        info!(common_name = cn, "STARTTLS uses a self-signed certificate");
    }

    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;
    info!("Ctrl-C received, stopping");
    server.stop(STOP_WAIT, true).await;
    Ok(())
}

fn config_from_env() -> anyhow::Result<Config> {
    let mut builder = Config::builder();

    if let Some(hosts) = var("SMTPGATE_HOSTS") {
        builder = builder.hosts(hosts);
    }
    if let Some(ports) = var("SMTPGATE_PORTS") {
        builder = builder.ports(ports);
    }
    if let Some(max) = parsed::<usize>("SMTPGATE_MAX_PROCESSINGS")? {
        builder = builder.max_processings(max);
    }
    if let Some(max) = parsed::<usize>("SMTPGATE_MAX_CONNECTIONS")? {
        builder = builder.max_connections(Some(max));
    }
    if let Some(secs) = parsed::<u64>("SMTPGATE_IO_CMD_TIMEOUT")? {
        builder = builder.io_cmd_timeout((secs > 0).then_some(Duration::from_secs(secs)));
    }
    if let Some(mode) = var("SMTPGATE_CRLF_MODE") {
        builder = builder.crlf_mode(match mode.to_ascii_lowercase().as_str() {
            "ensure" => CrlfMode::Ensure,
            "leave" => CrlfMode::Leave,
            "strict" => CrlfMode::Strict,
            other => bail!("SMTPGATE_CRLF_MODE: unknown mode {other:?}"),
        });
    }
    if let Some(enabled) = parsed::<bool>("SMTPGATE_REVERSE_DNS")? {
        builder = builder.reverse_dns(enabled);
    }
    if let Some(enabled) = parsed::<bool>("SMTPGATE_PIPELINING")? {
        builder = builder.pipelining(enabled);
    }
    if let Some(enabled) = parsed::<bool>("SMTPGATE_INTERNATIONALIZATION")? {
        builder = builder.internationalization(enabled);
    }
    if let Some(enabled) = parsed::<bool>("SMTPGATE_PROXY")? {
        builder = builder.proxy_extension(enabled);
    }
    if let Some(enabled) = parsed::<bool>("SMTPGATE_PROXY_CHAINED")? {
        builder = builder.proxy_policy(if enabled {
            ProxyPolicy::Chained
        } else {
            ProxyPolicy::Single
        });
    }
    if let Some(mode) = var("SMTPGATE_AUTH") {
        builder = builder.auth_mode(match mode.to_ascii_lowercase().as_str() {
            "forbidden" => AuthMode::Forbidden,
            "optional" => AuthMode::Optional,
            "required" => AuthMode::Required,
            other => bail!("SMTPGATE_AUTH: unknown mode {other:?}"),
        });
    }
    if let Some(mode) = var("SMTPGATE_TLS") {
        builder = builder.tls_mode(match mode.to_ascii_lowercase().as_str() {
            "forbidden" => TlsMode::Forbidden,
            "optional" => TlsMode::Optional,
            "required" => TlsMode::Required,
            other => bail!("SMTPGATE_TLS: unknown mode {other:?}"),
        });
    }
    match (var("SMTPGATE_TLS_CERT"), var("SMTPGATE_TLS_KEY")) {
        (Some(cert), Some(key)) => builder = builder.tls_cert_files(cert, key),
        (None, None) => {}
        _ => bail!("SMTPGATE_TLS_CERT and SMTPGATE_TLS_KEY must be set together"),
    }
    if let Some(cn) = var("SMTPGATE_TLS_CN") {
        let san = var("SMTPGATE_TLS_SAN")
            .map(|san| san.split(',').map(|s| s.trim().to_string()).collect())
            .unwrap_or_default();
        builder = builder.tls_cert_names(cn, san);
    }
    if let Some(ciphers) = var("SMTPGATE_TLS_CIPHERS") {
        builder = builder.tls_ciphers(ciphers);
    }
    if let Some(protocols) = var("SMTPGATE_TLS_PROTOCOLS") {
        builder = builder.tls_protocols(protocols);
    }

    Ok(builder.build()?)
}

fn var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn parsed<T>(name: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    var(name)
        .map(|value| {
            value
                .trim()
                .parse()
                .with_context(|| format!("{name}: invalid value {value:?}"))
        })
        .transpose()
}
