//! Session state: the context record and the command sequence.

mod context;

pub use context::{
    BodyEncoding, Context, Envelope, ErrorRecord, Message, ServerContext,
};

use crate::error::ProtocolError;

/// Command sequence state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Sequence {
    /// Waiting for HELO/EHLO.
    #[default]
    Helo,
    /// Greeted and idle.
    Rset,
    /// MAIL FROM accepted.
    Mail,
    /// At least one RCPT TO accepted.
    Rcpt,
    /// Receiving message data.
    Data,
    /// AUTH PLAIN waiting for credentials.
    AuthPlainValues,
    /// AUTH LOGIN waiting for the user name.
    AuthLoginUser,
    /// AUTH LOGIN waiting for the password.
    AuthLoginPass,
    /// STARTTLS accepted; handshake pending.
    StartTls,
    /// QUIT received.
    Quit,
}

impl Sequence {
    /// Returns true while an AUTH exchange awaits a client response.
    #[must_use]
    pub const fn in_auth_challenge(self) -> bool {
        matches!(
            self,
            Self::AuthPlainValues | Self::AuthLoginUser | Self::AuthLoginPass
        )
    }
}

/// One connection's protocol state.
#[derive(Debug, Clone, Default)]
pub struct Session {
    /// Context shared with hooks.
    pub ctx: Context,
    pub(crate) sequence: Sequence,
    pub(crate) login_user: Option<String>,
    pub(crate) preamble_done: bool,
    pub(crate) data_started: bool,
    pub(crate) message_rejection: Option<ProtocolError>,
}

impl Session {
    /// Creates the state of a freshly accepted connection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current command sequence state.
    #[must_use]
    pub const fn sequence(&self) -> Sequence {
        self.sequence
    }

    /// Clears envelope and message and returns to [`Sequence::Rset`].
    pub fn reset_transaction(&mut self) {
        self.ctx.envelope = Envelope::default();
        self.ctx.message = Message::default();
        self.login_user = None;
        self.data_started = false;
        self.message_rejection = None;
        self.sequence = Sequence::Rset;
    }

    /// Counts and records a protocol error replied to the client.
    pub fn record_error(&mut self, err: &ProtocolError) {
        self.ctx.server.exceptions = self.ctx.server.exceptions.saturating_add(1);
        self.ctx.server.errors.push(ErrorRecord::from(err));
    }

    /// Marks the session encrypted after a STARTTLS handshake.
    ///
    /// Everything learned over plaintext is dropped; the client must greet
    /// again before any other command.
    pub fn tls_established(&mut self) {
        self.reset_transaction();
        self.ctx.server.helo.clear();
        self.ctx.server.encrypted = Some(chrono::Utc::now());
        self.sequence = Sequence::Helo;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn new_session_waits_for_helo() {
        let session = Session::new();
        assert_eq!(session.sequence(), Sequence::Helo);
        assert!(session.ctx.envelope.to.is_empty());
        assert!(session.ctx.message.data.is_empty());
        assert!(!session.ctx.server.is_authenticated());
        assert!(!session.ctx.server.is_encrypted());
    }

    #[test]
    fn reset_keeps_server_fields() {
        let mut session = Session::new();
        session.ctx.server.helo = "client".to_string();
        session.ctx.envelope.from = "<a@b>".to_string();
        session.ctx.envelope.to.push("<c@d>".to_string());
        session.ctx.message.data.extend_from_slice(b"body");
        session.sequence = Sequence::Rcpt;

        session.reset_transaction();

        assert_eq!(session.sequence(), Sequence::Rset);
        assert_eq!(session.ctx.envelope, Envelope::default());
        assert!(session.ctx.message.data.is_empty());
        assert_eq!(session.ctx.server.helo, "client");
    }

    #[test]
    fn record_error_counts() {
        let mut session = Session::new();
        session.record_error(&ProtocolError::BadSequence);
        session.record_error(&ProtocolError::SyntaxError);

        assert_eq!(session.ctx.server.exceptions, 2);
        assert_eq!(session.ctx.server.errors.len(), 2);
        assert_eq!(session.ctx.server.errors[0].code.as_u16(), 503);
    }

    #[test]
    fn challenge_states() {
        assert!(Sequence::AuthLoginPass.in_auth_challenge());
        assert!(!Sequence::Rset.in_auth_challenge());
    }

    #[test]
    fn headers_slice() {
        let mut message = Message::default();
        message.data.extend_from_slice(b"Subject: x\r\n\r\nbody\r\n");
        assert!(message.headers().is_none());
        message.header_size = Some(14);
        assert_eq!(message.headers(), Some(&b"Subject: x\r\n\r\n"[..]));
        assert!(message.headers_seen());
    }

    #[test]
    fn tls_established_forces_new_greeting() {
        let mut session = Session::new();
        session.ctx.server.helo = "client".to_string();
        session.ctx.envelope.from = "<a@b>".to_string();
        session.sequence = Sequence::StartTls;

        session.tls_established();

        assert_eq!(session.sequence(), Sequence::Helo);
        assert!(session.ctx.server.is_encrypted());
        assert!(session.ctx.server.helo.is_empty());
        assert!(session.ctx.envelope.from.is_empty());
    }
}
