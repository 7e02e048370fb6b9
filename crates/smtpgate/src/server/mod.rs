//! TCP acceptor and server lifecycle.
//!
//! A [`Server`] binds one listener per resolved address and spawns a task per
//! accepted connection. Connections are counted twice by a shared governor:
//! every open socket counts against `max_connections`, and only
//! `max_processings` sessions run the protocol at once; the others wait
//! before their greeting.
//!
//! Shutdown has two phases. [`Server::shutdown`] stops the accept loops and
//! asks open sessions to close with 221 once they are idle (a message being
//! received is completed first). [`Server::stop`] additionally waits for the
//! sessions and then aborts whatever is left.

mod client;
mod governor;
mod resolve;

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::error::{Error, Result};
use crate::handler::Handler;
use crate::tls::TlsTransport;
use governor::Governor;
use resolve::ReverseDns;

/// State shared by the accept loops and sessions of one server.
pub(crate) struct Shared<H> {
    pub(crate) dispatcher: Dispatcher<H>,
    pub(crate) tls: Option<TlsTransport>,
    pub(crate) reverse_dns: Option<ReverseDns>,
    pub(crate) governor: Arc<Governor>,
    pub(crate) shutdown: watch::Receiver<bool>,
    pub(crate) abort: watch::Receiver<bool>,
}

/// An SMTP server.
///
/// # Example
///
/// ```ignore
/// use smtpgate::{Config, LoggingHandler, Server};
///
/// let config = Config::builder().ports("2525").build()?;
/// let mut server = Server::new(config, LoggingHandler);
/// server.start().await?;
/// tokio::signal::ctrl_c().await?;
/// server.stop(Duration::from_secs(2), true).await;
/// ```
pub struct Server<H: Handler> {
    config: Arc<Config>,
    handler: Arc<H>,
    governor: Arc<Governor>,
    shutdown: watch::Sender<bool>,
    abort: watch::Sender<bool>,
    listeners: Vec<JoinHandle<()>>,
    local_addrs: Vec<SocketAddr>,
    tls_common_name: Option<String>,
}

impl<H: Handler> std::fmt::Debug for Server<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("local_addrs", &self.local_addrs)
            .field("connections", &self.connections())
            .field("processings", &self.processings())
            .field("shutdown", &self.is_shutdown())
            .finish_non_exhaustive()
    }
}

impl<H: Handler> Server<H> {
    /// Creates a server; nothing is bound until [`start`](Self::start).
    #[must_use]
    pub fn new(config: Config, handler: H) -> Self {
        Self::with_shared_handler(config, Arc::new(handler))
    }

    /// Creates a server around a handler the caller keeps a reference to.
    #[must_use]
    pub fn with_shared_handler(config: Config, handler: Arc<H>) -> Self {
        let governor = Arc::new(Governor::new(config.max_processings, config.max_connections));
        Self {
            config: Arc::new(config),
            handler,
            governor,
            shutdown: watch::Sender::new(false),
            abort: watch::Sender::new(false),
            listeners: Vec::new(),
            local_addrs: Vec::new(),
            tls_common_name: None,
        }
    }

    /// Binds the listeners and starts accepting connections.
    ///
    /// Addresses that fail to resolve or bind are logged and skipped.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the server was already started or shut down.
    /// - [`Error::Bind`] if no listener could be bound.
    /// - A TLS error if STARTTLS is enabled and the TLS context cannot be built.
    pub async fn start(&mut self) -> Result<()> {
        if !self.listeners.is_empty() {
            return Err(Error::config("server is already started"));
        }
        if self.is_shutdown() {
            return Err(Error::config("server is shut down"));
        }

        let mut listeners = Vec::new();
        for addr in resolve::bind_addresses(&self.config.bind_specs()).await {
            match TcpListener::bind(addr).await {
                Ok(listener) => listeners.push(listener),
                Err(err) => tracing::error!(%addr, error = %err, "cannot bind listener"),
            }
        }
        if listeners.is_empty() {
            return Err(Error::Bind(format!(
                "hosts {:?} ports {:?}",
                self.config.hosts, self.config.ports
            )));
        }
        let local_addrs: Vec<SocketAddr> = listeners
            .iter()
            .filter_map(|listener| listener.local_addr().ok())
            .collect();

        let tls = if self.config.tls_enabled() {
            let ips: Vec<IpAddr> = local_addrs.iter().map(SocketAddr::ip).collect();
            Some(TlsTransport::from_config(
                &self.config.tls,
                &self.config.hosts,
                &ips,
            )?)
        } else {
            None
        };
        self.tls_common_name = tls
            .as_ref()
            .and_then(|tls| tls.common_name().map(str::to_string));
        let reverse_dns = if self.config.reverse_dns {
            ReverseDns::from_system_conf()
        } else {
            None
        };

        let shared = Arc::new(Shared {
            dispatcher: Dispatcher::new(
                Arc::clone(&self.config),
                Arc::clone(&self.handler),
                tls.is_some(),
            ),
            tls,
            reverse_dns,
            governor: Arc::clone(&self.governor),
            shutdown: self.shutdown.subscribe(),
            abort: self.abort.subscribe(),
        });
        for listener in listeners {
            let shutdown = self.shutdown.subscribe();
            self.listeners
                .push(tokio::spawn(accept_loop(listener, Arc::clone(&shared), shutdown)));
        }
        tracing::info!(addrs = ?local_addrs, "smtp server started");
        self.local_addrs = local_addrs;
        Ok(())
    }

    /// Addresses the server listens on, with actual ports for port 0.
    #[must_use]
    pub fn local_addrs(&self) -> &[SocketAddr] {
        &self.local_addrs
    }

    /// Common name of the generated self-signed certificate, if any.
    #[must_use]
    pub fn tls_common_name(&self) -> Option<&str> {
        self.tls_common_name.as_deref()
    }

    /// Returns the event handler.
    #[must_use]
    pub fn handler(&self) -> &Arc<H> {
        &self.handler
    }

    /// Number of open connections.
    #[must_use]
    pub fn connections(&self) -> usize {
        self.governor.connections()
    }

    /// Number of sessions currently running the protocol.
    #[must_use]
    pub fn processings(&self) -> usize {
        self.governor.processings()
    }

    /// Stops accepting new connections and closes sessions as they go idle.
    pub fn shutdown(&self) {
        if !self.shutdown.send_replace(true) {
            tracing::info!("smtp server shutting down");
        }
    }

    /// Returns true once [`shutdown`](Self::shutdown) was requested.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Stops the server.
    ///
    /// With `graceful`, open sessions get up to `wait` to finish their current
    /// transaction and close with 221. Sessions still open afterwards (or all
    /// of them without `graceful`) are aborted, and up to `wait` more is
    /// allowed for them to unwind.
    pub async fn stop(&mut self, wait: Duration, graceful: bool) {
        self.shutdown();
        if graceful
            && tokio::time::timeout(wait, self.governor.wait_idle())
                .await
                .is_err()
        {
            tracing::warn!(
                connections = self.connections(),
                "sessions did not finish in time, aborting"
            );
        }
        if self.connections() > 0 {
            self.abort.send_replace(true);
            if tokio::time::timeout(wait, self.governor.wait_idle())
                .await
                .is_err()
            {
                tracing::error!(
                    connections = self.connections(),
                    "sessions still open after abort"
                );
            }
        }
        self.join_listeners().await;
        tracing::info!("smtp server stopped");
    }

    /// Returns true when no listener runs and no connection is open.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.listeners.iter().all(JoinHandle::is_finished) && self.connections() == 0
    }

    /// Waits until the server has shut down and every connection closed.
    pub async fn join(&mut self) {
        self.join_listeners().await;
        self.governor.wait_idle().await;
    }

    async fn join_listeners(&mut self) {
        for listener in self.listeners.drain(..) {
            if let Err(err) = listener.await {
                tracing::error!(error = %err, "listener task failed");
            }
        }
    }
}

impl<H: Handler> Drop for Server<H> {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}

async fn accept_loop<H: Handler>(
    listener: TcpListener,
    shared: Arc<Shared<H>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let local = listener.local_addr().ok();
    loop {
        let accepted = tokio::select! {
            _ = shutdown.wait_for(|stop| *stop) => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, peer)) => {
                tracing::debug!(%peer, "connection accepted");
                tokio::spawn(client::serve(Arc::clone(&shared), stream, peer));
            }
            Err(err) => {
                tracing::warn!(error = %err, "accept failed");
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
    tracing::debug!(addr = ?local, "listener closed");
}
