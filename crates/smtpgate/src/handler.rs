//! Event hooks called by the protocol engine.
//!
//! Every hook receives the session [`Context`] and may reject the current
//! step by returning [`HookError::Reject`] with the reply to send. Any other
//! failure ([`HookError::Failed`]) is logged and turned into a generic reply,
//! so a faulty hook never takes the listener down.
//!
//! # Example
//!
//! ```ignore
//! use smtpgate::{Context, Handler, HookResult, ProtocolError};
//!
//! struct Inbox;
//!
//! impl Handler for Inbox {
//!     async fn on_rcpt_to(&self, _ctx: &mut Context, to: &str) -> HookResult<Option<String>> {
//!         if to.ends_with("@example.com>") {
//!             Ok(None)
//!         } else {
//!             Err(ProtocolError::MailboxUnavailable.into())
//!         }
//!     }
//!
//!     async fn on_message_data(&self, ctx: &mut Context) -> HookResult<()> {
//!         store(&ctx.envelope, &ctx.message.data).await?;
//!         Ok(())
//!     }
//! }
//! ```

use std::future::Future;

use crate::error::{HookResult, ProtocolError};
use crate::session::Context;
use crate::types::Reply;

/// Hooks for SMTP session events.
///
/// All hooks are no-ops by default, except [`Handler::on_auth`] which denies
/// every credential and [`Handler::on_unknown_line`] which replies 500.
pub trait Handler: Send + Sync + 'static {
    /// Called after the connection was accepted, before the greeting.
    ///
    /// `ctx.server.local_response` and `ctx.server.helo_response` may be
    /// rewritten here.
    fn on_connect(&self, ctx: &mut Context) -> impl Future<Output = HookResult<()>> + Send {
        let _ = ctx;
        async { Ok(()) }
    }

    /// Called once when the connection ends, whatever the reason.
    fn on_disconnect(&self, ctx: &mut Context) -> impl Future<Output = ()> + Send {
        let _ = ctx;
        async {}
    }

    /// Called for HELO/EHLO with the client's argument.
    fn on_helo(
        &self,
        ctx: &mut Context,
        helo: &str,
    ) -> impl Future<Output = HookResult<()>> + Send {
        let _ = (ctx, helo);
        async { Ok(()) }
    }

    /// Verifies AUTH credentials.
    ///
    /// Returns a replacement authorization id, or `None` to keep the one the
    /// client sent (or the authentication id if that was empty).
    fn on_auth(
        &self,
        ctx: &mut Context,
        authorization_id: &str,
        authentication_id: &str,
        secret: &str,
    ) -> impl Future<Output = HookResult<Option<String>>> + Send {
        let _ = (ctx, authorization_id, authentication_id, secret);
        async { Err(ProtocolError::CredentialsInvalid.into()) }
    }

    /// Called for MAIL FROM. A returned value replaces the stored sender.
    fn on_mail_from(
        &self,
        ctx: &mut Context,
        from: &str,
    ) -> impl Future<Output = HookResult<Option<String>>> + Send {
        let _ = (ctx, from);
        async { Ok(None) }
    }

    /// Called for RCPT TO. A returned value replaces the stored recipient.
    fn on_rcpt_to(
        &self,
        ctx: &mut Context,
        to: &str,
    ) -> impl Future<Output = HookResult<Option<String>>> + Send {
        let _ = (ctx, to);
        async { Ok(None) }
    }

    /// Called when the first line after DATA arrives, including the
    /// terminating dot of an empty message.
    fn on_message_data_start(
        &self,
        ctx: &mut Context,
    ) -> impl Future<Output = HookResult<()>> + Send {
        let _ = ctx;
        async { Ok(()) }
    }

    /// Called when the blank line ending the headers arrives.
    fn on_message_data_headers(
        &self,
        ctx: &mut Context,
    ) -> impl Future<Output = HookResult<()>> + Send {
        let _ = ctx;
        async { Ok(()) }
    }

    /// Called after every message line is stored.
    ///
    /// Rejecting here discards the rest of the message; the rejection is
    /// replied when the terminating dot arrives.
    fn on_message_data_receiving(
        &self,
        ctx: &mut Context,
    ) -> impl Future<Output = HookResult<()>> + Send {
        let _ = ctx;
        async { Ok(()) }
    }

    /// Called with the complete message.
    ///
    /// A [`HookError::Failed`](crate::HookError::Failed) is replied as 451.
    fn on_message_data(&self, ctx: &mut Context) -> impl Future<Output = HookResult<()>> + Send {
        let _ = ctx;
        async { Ok(()) }
    }

    /// Called for lines that match no command.
    fn on_unknown_line(
        &self,
        ctx: &mut Context,
        line: &str,
    ) -> impl Future<Output = HookResult<Reply>> + Send {
        let _ = (ctx, line);
        async { Err(ProtocolError::SyntaxError.into()) }
    }
}

/// A handler that keeps every default.
///
/// Mail is accepted and dropped; AUTH always fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHandler;

impl Handler for NoopHandler {}

/// A handler that logs session events using tracing.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHandler;

impl Handler for LoggingHandler {
    async fn on_connect(&self, ctx: &mut Context) -> HookResult<()> {
        tracing::info!(
            remote = %ctx.server.remote_host,
            local = %ctx.server.local_host,
            "client connected"
        );
        Ok(())
    }

    async fn on_disconnect(&self, ctx: &mut Context) {
        tracing::info!(
            remote = %ctx.server.remote_host,
            exceptions = ctx.server.exceptions,
            "client disconnected"
        );
    }

    async fn on_helo(&self, _ctx: &mut Context, helo: &str) -> HookResult<()> {
        tracing::debug!(helo, "HELO");
        Ok(())
    }

    async fn on_mail_from(&self, _ctx: &mut Context, from: &str) -> HookResult<Option<String>> {
        tracing::debug!(from, "MAIL FROM");
        Ok(None)
    }

    async fn on_rcpt_to(&self, _ctx: &mut Context, to: &str) -> HookResult<Option<String>> {
        tracing::debug!(to, "RCPT TO");
        Ok(None)
    }

    async fn on_message_data(&self, ctx: &mut Context) -> HookResult<()> {
        tracing::info!(
            from = %ctx.envelope.from,
            to = ?ctx.envelope.to,
            bytes = ctx.message.bytesize,
            "message received"
        );
        Ok(())
    }
}
