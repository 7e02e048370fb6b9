//! Command dispatcher and protocol state machine.
//!
//! [`Dispatcher::process_line`] interprets one line against the session's
//! [`Sequence`] and returns the reply to send, `None` for no reply, or the
//! [`ProtocolError`] to reply instead. Lines are routed in this order:
//!
//! 1. an open AUTH challenge takes the line whatever it contains;
//! 2. outside DATA, the line is parsed as a command;
//! 3. inside DATA, the line is message content or the terminating dot.

mod auth;

use std::sync::Arc;

use chrono::Utc;

use crate::command::Command;
use crate::config::{AuthMode, Config, CrlfMode, ProxyPolicy, TlsMode};
use crate::connection::{LineBreak, chomp};
use crate::error::{HookError, ProtocolError};
use crate::handler::Handler;
use crate::proxy::ProxyRecord;
use crate::session::{BodyEncoding, Session, Sequence};
use crate::types::{AuthMechanism, Extension, Reply, ReplyCode};

/// Interprets client lines for every session of one server.
#[derive(Debug)]
pub struct Dispatcher<H> {
    config: Arc<Config>,
    handler: Arc<H>,
    tls_available: bool,
}

impl<H> Clone for Dispatcher<H> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            handler: Arc::clone(&self.handler),
            tls_available: self.tls_available,
        }
    }
}

impl<H: Handler> Dispatcher<H> {
    /// Creates a dispatcher. `tls_available` tells whether a TLS context
    /// exists for STARTTLS.
    #[must_use]
    pub const fn new(config: Arc<Config>, handler: Arc<H>, tls_available: bool) -> Self {
        Self {
            config,
            handler,
            tls_available,
        }
    }

    /// Returns the server configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the event handler.
    #[must_use]
    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Handles one raw line as read from the socket, terminator included.
    ///
    /// Applies the pipelining check and the CRLF policy before
    /// [`process_line`](Self::process_line). Every error is counted in the
    /// session context before it is returned.
    ///
    /// # Errors
    ///
    /// Returns the protocol error to reply.
    pub async fn process_input(
        &self,
        session: &mut Session,
        raw: Vec<u8>,
        more_buffered: bool,
    ) -> Result<Option<Reply>, ProtocolError> {
        let result = self.process_raw(session, raw, more_buffered).await;
        if let Err(err) = &result {
            session.record_error(err);
            tracing::warn!(code = err.code().as_u16(), error = %err.text(), "protocol error");
        }
        result
    }

    async fn process_raw(
        &self,
        session: &mut Session,
        raw: Vec<u8>,
        more_buffered: bool,
    ) -> Result<Option<Reply>, ProtocolError> {
        if !self.config.pipelining && more_buffered && session.sequence != Sequence::Data {
            return Err(ProtocolError::PipeliningNotAllowed);
        }
        let (line, line_break) = self.config.crlf_mode.normalize(raw)?;
        if self.config.crlf_mode == CrlfMode::Leave && session.sequence == Sequence::Data {
            session.ctx.message.crlf = line_break;
        }
        self.process_line(session, &line, line_break).await
    }

    /// Interprets one line without its terminator.
    ///
    /// `line_break` is appended to message content while in DATA.
    ///
    /// # Errors
    ///
    /// Returns the protocol error to reply. A fatal error
    /// ([`ProtocolError::is_fatal`]) ends the connection.
    pub async fn process_line(
        &self,
        session: &mut Session,
        line: &[u8],
        line_break: LineBreak,
    ) -> Result<Option<Reply>, ProtocolError> {
        if session.sequence.in_auth_challenge() {
            let line = String::from_utf8_lossy(line);
            return self.auth_continue(session, &line).await;
        }
        if session.sequence == Sequence::Data {
            return self.data_line(session, line, line_break).await;
        }

        let line = String::from_utf8_lossy(line);
        let command = Command::parse(&line);
        if !matches!(command, Command::Proxy { .. }) {
            session.preamble_done = true;
        }

        match command {
            Command::Helo { hostname } => self.helo(session, hostname, false).await,
            Command::Ehlo { hostname } => self.helo(session, hostname, true).await,
            Command::StartTls => self.starttls(session),
            Command::Auth {
                mechanism,
                initial_response,
            } => self.auth_start(session, mechanism, initial_response).await,
            Command::Noop => Ok(Some(ok())),
            Command::Rset => self.rset(session),
            Command::Quit => {
                session.sequence = Sequence::Quit;
                Ok(None)
            }
            Command::MailFrom { argument } => self.mail_from(session, &argument).await,
            Command::RcptTo { argument } => self.rcpt_to(session, &argument).await,
            Command::Data => self.data(session),
            Command::Proxy { payload } => self.proxy(session, &line, &payload).await,
            Command::Unknown(line) => self.unknown(session, &line).await,
        }
    }

    async fn helo(
        &self,
        session: &mut Session,
        hostname: String,
        extended: bool,
    ) -> Result<Option<Reply>, ProtocolError> {
        if session.sequence != Sequence::Helo {
            return Err(ProtocolError::BadSequence);
        }
        self.handler
            .on_helo(&mut session.ctx, &hostname)
            .await
            .map_err(|err| hook_failure(err, ProtocolError::SyntaxError, "on_helo"))?;

        session.ctx.server.helo = hostname;
        session.sequence = Sequence::Rset;

        let greeting = session.ctx.server.helo_response.clone();
        if !extended {
            return Ok(Some(Reply::single(ReplyCode::OK, format!("OK {greeting}").trim_end())));
        }
        let mut lines = vec![greeting];
        lines.extend(self.extensions(session).iter().map(ToString::to_string));
        lines.push("OK".to_string());
        Ok(Some(Reply::new(ReplyCode::OK, lines)))
    }

    /// Extensions advertised in the EHLO reply.
    fn extensions(&self, session: &Session) -> Vec<Extension> {
        let mut extensions = Vec::new();
        if self.config.internationalization {
            extensions.push(Extension::EightBitMime);
            extensions.push(Extension::SmtpUtf8);
        }
        if self.config.pipelining {
            extensions.push(Extension::Pipelining);
        }
        if self.config.auth_mode != AuthMode::Forbidden {
            extensions.push(Extension::Auth(AuthMechanism::ADVERTISED.to_vec()));
        }
        if self.config.tls.mode != TlsMode::Forbidden
            && self.tls_available
            && !session.ctx.server.is_encrypted()
        {
            extensions.push(Extension::StartTls);
        }
        extensions
    }

    fn starttls(&self, session: &mut Session) -> Result<Option<Reply>, ProtocolError> {
        if self.config.tls.mode == TlsMode::Forbidden {
            return Err(ProtocolError::SyntaxError);
        }
        if session.sequence == Sequence::Helo {
            return Err(ProtocolError::BadSequence);
        }
        if !self.tls_available {
            return Err(ProtocolError::TlsNotAvailable);
        }
        if session.ctx.server.is_encrypted() {
            return Err(ProtocolError::BadSequence);
        }
        session.sequence = Sequence::StartTls;
        Ok(Some(Reply::single(ReplyCode::SERVICE_READY, "Ready to start TLS")))
    }

    fn rset(&self, session: &mut Session) -> Result<Option<Reply>, ProtocolError> {
        if session.sequence == Sequence::Helo {
            return Err(ProtocolError::BadSequence);
        }
        self.require_tls(session)?;
        session.reset_transaction();
        Ok(Some(ok()))
    }

    async fn mail_from(
        &self,
        session: &mut Session,
        argument: &str,
    ) -> Result<Option<Reply>, ProtocolError> {
        if session.sequence != Sequence::Rset {
            return Err(ProtocolError::BadSequence);
        }
        self.require_tls(session)?;
        self.require_auth(session)?;

        let mut tokens = argument.split_whitespace();
        let Some(path) = tokens.next() else {
            return Err(ProtocolError::ParameterError);
        };
        let mut kept = vec![path];
        let mut encoding_body = None;
        let mut encoding_utf8 = false;
        for token in tokens {
            let upper = token.to_ascii_uppercase();
            if let Some(value) = upper.strip_prefix("BODY=") {
                if !self.config.internationalization {
                    return Err(ProtocolError::ParameterError);
                }
                encoding_body = Some(match value {
                    "7BIT" => BodyEncoding::SevenBit,
                    "8BITMIME" => BodyEncoding::EightBitMime,
                    _ => return Err(ProtocolError::ParameterError),
                });
            } else if upper == "SMTPUTF8" {
                if !self.config.internationalization {
                    return Err(ProtocolError::ParameterError);
                }
                encoding_utf8 = true;
            } else {
                kept.push(token);
            }
        }
        let from = kept.join(" ");

        let replacement = self
            .handler
            .on_mail_from(&mut session.ctx, &from)
            .await
            .map_err(|err| hook_failure(err, ProtocolError::SyntaxError, "on_mail_from"))?;

        let envelope = &mut session.ctx.envelope;
        envelope.from = replacement.filter(|r| !r.is_empty()).unwrap_or(from);
        envelope.encoding_body = encoding_body;
        envelope.encoding_utf8 = encoding_utf8;
        session.sequence = Sequence::Mail;
        Ok(Some(ok()))
    }

    async fn rcpt_to(
        &self,
        session: &mut Session,
        argument: &str,
    ) -> Result<Option<Reply>, ProtocolError> {
        if !matches!(session.sequence, Sequence::Mail | Sequence::Rcpt) {
            return Err(ProtocolError::BadSequence);
        }
        self.require_tls(session)?;
        self.require_auth(session)?;
        if argument.is_empty() {
            return Err(ProtocolError::ParameterError);
        }

        let replacement = self
            .handler
            .on_rcpt_to(&mut session.ctx, argument)
            .await
            .map_err(|err| hook_failure(err, ProtocolError::SyntaxError, "on_rcpt_to"))?;

        let to = replacement
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| argument.to_string());
        session.ctx.envelope.to.push(to);
        session.sequence = Sequence::Rcpt;
        Ok(Some(ok()))
    }

    fn data(&self, session: &mut Session) -> Result<Option<Reply>, ProtocolError> {
        if session.sequence != Sequence::Rcpt {
            return Err(ProtocolError::BadSequence);
        }
        self.require_tls(session)?;
        self.require_auth(session)?;

        session.sequence = Sequence::Data;
        session.ctx.message.received = Some(Utc::now());
        Ok(Some(Reply::single(
            ReplyCode::START_DATA,
            "Enter message, ending with \".\" on a line by itself",
        )))
    }

    async fn proxy(
        &self,
        session: &mut Session,
        line: &str,
        payload: &str,
    ) -> Result<Option<Reply>, ProtocolError> {
        if !self.config.proxy_extension {
            session.preamble_done = true;
            return self.unknown(session, line).await;
        }
        if session.preamble_done {
            return Err(ProtocolError::BadSequence);
        }
        if self.config.proxy_policy == ProxyPolicy::Single && session.ctx.server.proxy.is_some() {
            return Err(ProtocolError::ServiceUnavailable);
        }

        let record = ProxyRecord::parse(payload)?;
        tracing::debug!(?record, "proxy preamble");
        session.ctx.server.proxy = Some(record);
        session.ctx.server.proxies.push(record);
        Ok(None)
    }

    async fn unknown(
        &self,
        session: &mut Session,
        line: &str,
    ) -> Result<Option<Reply>, ProtocolError> {
        self.handler
            .on_unknown_line(&mut session.ctx, line)
            .await
            .map(Some)
            .map_err(|err| hook_failure(err, ProtocolError::SyntaxError, "on_unknown_line"))
    }

    async fn data_line(
        &self,
        session: &mut Session,
        line: &[u8],
        line_break: LineBreak,
    ) -> Result<Option<Reply>, ProtocolError> {
        if !session.data_started {
            session.data_started = true;
            if let Err(err) = self.handler.on_message_data_start(&mut session.ctx).await {
                Self::reject_message(session, err, "on_message_data_start")?;
            }
        }
        if line == b"." {
            return self.finish_message(session).await;
        }
        if session.message_rejection.is_some() {
            return Ok(None);
        }

        let content = line.strip_prefix(b".").unwrap_or(line);
        let headers_end = content.is_empty() && !session.ctx.message.headers_seen();
        let message = &mut session.ctx.message;
        message.data.extend_from_slice(content);
        message.data.extend_from_slice(line_break.as_bytes());

        if headers_end {
            message.header_size = Some(message.data.len());
            if let Err(err) = self.handler.on_message_data_headers(&mut session.ctx).await {
                return Self::reject_message(session, err, "on_message_data_headers");
            }
        }
        if let Err(err) = self.handler.on_message_data_receiving(&mut session.ctx).await {
            return Self::reject_message(session, err, "on_message_data_receiving");
        }
        Ok(None)
    }

    /// Discards the message and keeps the rejection for the terminating dot.
    fn reject_message(
        session: &mut Session,
        err: HookError,
        hook: &'static str,
    ) -> Result<Option<Reply>, ProtocolError> {
        let rejection = hook_failure(err, ProtocolError::LocalError, hook);
        if rejection.is_fatal() {
            return Err(rejection);
        }
        session.ctx.message.data.clear();
        session.ctx.message.header_size = None;
        session.message_rejection = Some(rejection);
        Ok(None)
    }

    async fn finish_message(&self, session: &mut Session) -> Result<Option<Reply>, ProtocolError> {
        if let Some(rejection) = session.message_rejection.take() {
            session.reset_transaction();
            return Err(rejection);
        }

        let message = &mut session.ctx.message;
        chomp(&mut message.data);
        message.delivered = Some(Utc::now());
        message.bytesize = message.data.len();

        let result = self.handler.on_message_data(&mut session.ctx).await;
        session.reset_transaction();
        result
            .map(|()| {
                Some(Reply::single(ReplyCode::OK, "Requested mail action okay, completed"))
            })
            .map_err(|err| hook_failure(err, ProtocolError::LocalError, "on_message_data"))
    }

    fn require_tls(&self, session: &Session) -> Result<(), ProtocolError> {
        if self.config.tls.mode == TlsMode::Required && !session.ctx.server.is_encrypted() {
            return Err(ProtocolError::TlsRequired);
        }
        Ok(())
    }

    fn require_auth(&self, session: &Session) -> Result<(), ProtocolError> {
        if self.config.auth_mode == AuthMode::Required && !session.ctx.server.is_authenticated() {
            return Err(ProtocolError::AuthRequired);
        }
        Ok(())
    }
}

fn ok() -> Reply {
    Reply::single(ReplyCode::OK, "OK")
}

/// Maps a hook error to the reply to send.
pub(crate) fn hook_failure(
    err: HookError,
    fallback: ProtocolError,
    hook: &'static str,
) -> ProtocolError {
    match err {
        HookError::Reject(rejection) => rejection,
        HookError::Failed(err) => {
            tracing::error!(hook, "hook failed: {err:#}");
            fallback
        }
    }
}
