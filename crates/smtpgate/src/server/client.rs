//! Per-connection session loop.

use std::net::SocketAddr;
use std::sync::Arc;

use chrono::Utc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;

use super::Shared;
use crate::command::Command;
use crate::connection::{LineReader, SessionStream};
use crate::dispatch::{Dispatcher, hook_failure};
use crate::error::{Error, ProtocolError, Result};
use crate::handler::Handler;
use crate::session::{Sequence, ServerContext, Session};
use crate::types::{Reply, ReplyCode};

/// Serves one accepted connection until it closes.
///
/// The handler's `on_disconnect` runs whatever the outcome, unless the
/// connection was refused by the connection limit.
pub(crate) async fn serve<H: Handler>(shared: Arc<Shared<H>>, stream: TcpStream, peer: SocketAddr) {
    let Some(_connection) = shared.governor.admit() else {
        tracing::warn!(%peer, "connection limit reached, refusing client");
        refuse(stream).await;
        return;
    };

    let mut session = Session::new();
    let outcome = tokio::select! {
        biased;
        outcome = run(&shared, &mut session, stream, peer) => outcome,
        () = signalled(shared.abort.clone()) => Err(Error::Aborted),
    };
    match &outcome {
        Ok(()) => tracing::debug!(%peer, "session closed"),
        Err(err) if err.is_disconnect() => tracing::debug!(%peer, "client disconnected"),
        Err(Error::Aborted) => tracing::info!(%peer, "session aborted by shutdown"),
        Err(err) => tracing::warn!(%peer, error = %err, "session terminated"),
    }
    shared
        .dispatcher
        .handler()
        .on_disconnect(&mut session.ctx)
        .await;
}

async fn refuse(mut stream: TcpStream) {
    let reply = ProtocolError::ServiceUnavailable.reply().to_wire();
    let _ = stream.write_all(reply.as_bytes()).await;
    let _ = stream.shutdown().await;
}

/// Resolves once the flag behind `signal` is raised.
async fn signalled(mut signal: watch::Receiver<bool>) {
    if signal.wait_for(|raised| *raised).await.is_err() {
        std::future::pending::<()>().await;
    }
}

async fn run<H: Handler>(
    shared: &Shared<H>,
    session: &mut Session,
    stream: TcpStream,
    peer: SocketAddr,
) -> Result<()> {
    let _processing = shared.governor.acquire_processing().await;
    describe_endpoints(shared, &mut session.ctx.server, stream.local_addr().ok(), peer).await;

    let mut stream = SessionStream::plain(stream);
    if let Err(err) = shared.dispatcher.handler().on_connect(&mut session.ctx).await {
        let rejection = hook_failure(err, ProtocolError::ServiceUnavailable, "on_connect");
        tracing::info!(%peer, reply = %rejection, "connection rejected");
        let _ = stream.send(&rejection.reply()).await;
        let _ = stream.shutdown().await;
        return Ok(());
    }
    converse(shared, session, stream).await
}

/// Fills in the connection facts hooks see from `on_connect` on.
async fn describe_endpoints<H>(
    shared: &Shared<H>,
    server: &mut ServerContext,
    local: Option<SocketAddr>,
    peer: SocketAddr,
) {
    server.local_addr = local;
    server.remote_addr = Some(peer);
    server.connected = Some(Utc::now());

    let local_ip = local.map(|addr| addr.ip());
    match &shared.reverse_dns {
        Some(dns) => {
            if let Some(ip) = local_ip {
                server.local_host = dns.host_name(ip).await;
            }
            server.remote_host = dns.host_name(peer.ip()).await;
        }
        None => {
            server.local_host = local_ip.map(|ip| ip.to_string()).unwrap_or_default();
            server.remote_host = peer.ip().to_string();
        }
    }
    server.local_response = format!("{} says welcome!", server.local_host);
    server.helo_response = format!("{} at your service!", server.local_host);
}

/// Greets the client and runs the command loop until QUIT or a fault.
async fn converse<H, S>(
    shared: &Shared<H>,
    session: &mut Session,
    mut stream: SessionStream<S>,
) -> Result<()>
where
    H: Handler,
    S: AsyncRead + AsyncWrite + Unpin,
{
    let dispatcher = &shared.dispatcher;
    let mut reader = LineReader::from_config(dispatcher.config());
    let greeting = Reply::single(
        ReplyCode::SERVICE_READY,
        session.ctx.server.local_response.clone(),
    );
    stream.send(&greeting).await?;

    let result = loop {
        if session.sequence() == Sequence::StartTls {
            let Some(tls) = &shared.tls else {
                break Err(Error::TlsUnavailable);
            };
            let handshake = stream.upgrade(tls, reader.take_buffered());
            stream = match dispatcher.config().io_cmd_timeout {
                Some(limit) => tokio::time::timeout(limit, handshake)
                    .await
                    .map_err(|_| Error::Timeout(limit))??,
                None => handshake.await?,
            };
            session.tls_established();
            reader.reset_timeout();
            tracing::debug!(remote = %session.ctx.server.remote_host, "TLS established");
        }

        // A message in progress is completed before shutdown is honoured.
        let accepting_shutdown = session.sequence() != Sequence::Data;
        let raw = tokio::select! {
            biased;
            line = reader.read_line(&mut stream) => line.map(Some),
            () = signalled(shared.abort.clone()) => Err(Error::Aborted),
            () = signalled(shared.shutdown.clone()), if accepting_shutdown => Ok(None),
        };
        let raw = match raw {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                let remote = &session.ctx.server.remote_host;
                tracing::debug!(%remote, "closing session for shutdown");
                break stream.send(&closing()).await;
            }
            Err(err) => break Err(err),
        };
        match step(dispatcher, session, &mut stream, raw, reader.has_buffered_line()).await {
            Ok(true) => {}
            Ok(false) => break Ok(()),
            Err(err) => break Err(err),
        }
    };

    if let Err(err) = &result
        && !err.is_disconnect()
    {
        let reply = match err {
            Error::Terminated(rejection) => rejection.reply(),
            _ => ProtocolError::ServiceUnavailable.reply(),
        };
        let _ = stream.send(&reply).await;
    }
    let _ = stream.shutdown().await;
    result
}

/// Dispatches one line and writes its reply. Returns false after QUIT.
async fn step<H, S>(
    dispatcher: &Dispatcher<H>,
    session: &mut Session,
    stream: &mut SessionStream<S>,
    raw: Vec<u8>,
    more_buffered: bool,
) -> Result<bool>
where
    H: Handler,
    S: AsyncRead + AsyncWrite + Unpin,
{
    if tracing::enabled!(tracing::Level::DEBUG) {
        log_line(session, &raw);
    }
    match dispatcher.process_input(session, raw, more_buffered).await {
        Ok(Some(reply)) => stream.send(&reply).await?,
        Ok(None) => {}
        Err(err) if err.is_fatal() => return Err(Error::Terminated(err)),
        Err(err) => stream.send(&err.reply()).await?,
    }

    if session.sequence() == Sequence::Quit {
        stream.send(&closing()).await?;
        return Ok(false);
    }
    Ok(true)
}

fn closing() -> Reply {
    Reply::single(ReplyCode::CLOSING, "Service closing transmission channel")
}

/// Logs a client line with credentials masked.
fn log_line(session: &Session, raw: &[u8]) {
    let text = String::from_utf8_lossy(raw);
    let line = text.trim_end();
    let sequence = session.sequence();
    let secret = sequence.in_auth_challenge()
        || (sequence != Sequence::Data && Command::parse(line).carries_credentials());
    if secret {
        tracing::debug!(line = "<credentials hidden>", "C:");
    } else {
        tracing::debug!(line, "C:");
    }
}
