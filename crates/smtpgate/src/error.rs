//! Error types for the SMTP engine.
//!
//! Three kinds of failure are kept apart:
//!
//! - [`ProtocolError`]: an expected SMTP rejection. It always becomes a reply
//!   and the session continues, except for [`ProtocolError::ServiceUnavailable`]
//!   which ends the connection.
//! - [`Error`]: a transport or setup fault. It is fatal to the connection (or
//!   to server startup) but never to the process.
//! - [`HookError`]: what event hooks return. A rejection is passed through
//!   verbatim, any other failure is logged and converted to a reply.

use std::io;

use crate::types::{Reply, ReplyCode};

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Fatal engine errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// TLS error.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// Certificate generation failed.
    #[error("certificate error: {0}")]
    Certificate(#[from] rcgen::Error),

    /// STARTTLS was negotiated but no TLS context is configured.
    #[error("TLS is not available")]
    TlsUnavailable,

    /// No complete line arrived within the command timeout.
    #[error("no command received within {0:?}")]
    Timeout(std::time::Duration),

    /// The client sent more than the buffer cap without a line feed.
    #[error("input buffer exceeded {0} bytes without a line feed")]
    BufferOverrun(usize),

    /// The peer closed the connection.
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// The session was aborted by server shutdown.
    #[error("session aborted by server shutdown")]
    Aborted,

    /// A protocol error that terminates the connection.
    #[error("connection terminated: {0}")]
    Terminated(ProtocolError),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// No listener could be bound.
    #[error("could not bind any listener: {0}")]
    Bind(String),
}

impl Error {
    /// Creates a configuration error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Returns true if the peer went away and no final reply can be sent.
    #[must_use]
    pub const fn is_disconnect(&self) -> bool {
        matches!(self, Self::ConnectionClosed)
    }
}

/// An SMTP protocol exception carrying exactly one reply code and text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{} {}", self.code(), self.text())]
pub enum ProtocolError {
    /// 421, closes the connection.
    ServiceUnavailable,
    /// 432
    PasswordTransitionNeeded,
    /// 450
    MailboxBusy,
    /// 451
    LocalError,
    /// 452
    InsufficientStorage,
    /// 454, STARTTLS requested without a TLS context.
    TlsNotAvailable,
    /// 454, credential check could not be completed.
    TemporaryAuthFailure,
    /// 500
    SyntaxError,
    /// 500, more than one command buffered without PIPELINING.
    PipeliningNotAllowed,
    /// 500, line not terminated by CRLF in strict mode.
    CrlfRequired,
    /// 500, bare CR inside a line in strict mode.
    CarriageReturnInLine,
    /// 500, unsupported AUTH mechanism.
    MechanismNotSupported,
    /// 501
    ParameterError,
    /// 501, client cancelled an AUTH exchange.
    AuthCanceled,
    /// 502
    NotImplemented,
    /// 503
    BadSequence,
    /// 504
    ParameterNotImplemented,
    /// 521
    DoesNotAcceptMail,
    /// 530, MAIL/RCPT/DATA before AUTH.
    AuthRequired,
    /// 530, command before STARTTLS.
    TlsRequired,
    /// 534
    MechanismTooWeak,
    /// 535
    CredentialsInvalid,
    /// 538
    EncryptionRequiredForMechanism,
    /// 550
    MailboxUnavailable,
    /// 552
    ExceededStorage,
    /// 553
    MailboxNameNotAllowed,
    /// 554
    TransactionFailed,
    /// Any other reply chosen by a hook.
    Custom {
        /// Reply code.
        code: ReplyCode,
        /// Reply text.
        text: String,
    },
}

impl ProtocolError {
    /// Creates a custom rejection.
    #[must_use]
    pub fn custom(code: u16, text: impl Into<String>) -> Self {
        Self::Custom {
            code: ReplyCode::new(code),
            text: text.into(),
        }
    }

    /// Reply code and text for every variant.
    fn entry(&self) -> (ReplyCode, &str) {
        match self {
            Self::ServiceUnavailable => (
                ReplyCode::SERVICE_UNAVAILABLE,
                "Service too busy or not available, closing transmission channel",
            ),
            Self::PasswordTransitionNeeded => (
                ReplyCode::PASSWORD_TRANSITION,
                "A password transition is needed",
            ),
            Self::MailboxBusy => (
                ReplyCode::MAILBOX_BUSY,
                "Requested mail action not taken: mailbox unavailable",
            ),
            Self::LocalError => (
                ReplyCode::LOCAL_ERROR,
                "Requested action aborted: local error in processing",
            ),
            Self::InsufficientStorage => (
                ReplyCode::INSUFFICIENT_STORAGE,
                "Requested action not taken: insufficient system storage",
            ),
            Self::TlsNotAvailable => (ReplyCode::TEMPORARY_FAILURE, "TLS not available"),
            Self::TemporaryAuthFailure => (
                ReplyCode::TEMPORARY_FAILURE,
                "Temporary authentication failure",
            ),
            Self::SyntaxError => (
                ReplyCode::SYNTAX_ERROR,
                "Syntax error, command unrecognised or error in parameters or arguments",
            ),
            Self::PipeliningNotAllowed => (
                ReplyCode::SYNTAX_ERROR,
                "Bad input, PIPELINING is not allowed",
            ),
            Self::CrlfRequired => (
                ReplyCode::SYNTAX_ERROR,
                "Bad input, Lines must be terminated by CRLF sequence",
            ),
            Self::CarriageReturnInLine => (
                ReplyCode::SYNTAX_ERROR,
                "Bad input, Line contains additional CR chars",
            ),
            Self::MechanismNotSupported => (
                ReplyCode::SYNTAX_ERROR,
                "Authentication mechanism not supported",
            ),
            Self::ParameterError => (
                ReplyCode::PARAMETER_ERROR,
                "Syntax error in parameters or arguments",
            ),
            Self::AuthCanceled => (ReplyCode::PARAMETER_ERROR, "Authentication canceled"),
            Self::NotImplemented => (ReplyCode::NOT_IMPLEMENTED, "Command not implemented"),
            Self::BadSequence => (ReplyCode::BAD_SEQUENCE, "Bad sequence of commands"),
            Self::ParameterNotImplemented => (
                ReplyCode::PARAMETER_NOT_IMPLEMENTED,
                "Command parameter not implemented",
            ),
            Self::DoesNotAcceptMail => (
                ReplyCode::DOES_NOT_ACCEPT_MAIL,
                "Server does not accept mail",
            ),
            Self::AuthRequired => (ReplyCode::ACCESS_DENIED, "Authentication required"),
            Self::TlsRequired => (
                ReplyCode::ACCESS_DENIED,
                "Encryption required, must issue STARTTLS command first",
            ),
            Self::MechanismTooWeak => (
                ReplyCode::MECHANISM_TOO_WEAK,
                "Authentication mechanism is too weak",
            ),
            Self::CredentialsInvalid => (
                ReplyCode::AUTH_FAILED,
                "Authentication credentials invalid",
            ),
            Self::EncryptionRequiredForMechanism => (
                ReplyCode::ENCRYPTION_REQUIRED,
                "Encryption required for requested authentication mechanism",
            ),
            Self::MailboxUnavailable => (
                ReplyCode::MAILBOX_UNAVAILABLE,
                "Requested action not taken: mailbox unavailable",
            ),
            Self::ExceededStorage => (
                ReplyCode::EXCEEDED_STORAGE,
                "Requested mail action aborted: exceeded storage allocation",
            ),
            Self::MailboxNameNotAllowed => (
                ReplyCode::MAILBOX_NAME_INVALID,
                "Requested action not taken: mailbox name not allowed",
            ),
            Self::TransactionFailed => (ReplyCode::TRANSACTION_FAILED, "Transaction failed"),
            Self::Custom { code, text } => (*code, text.as_str()),
        }
    }

    /// Returns the reply code.
    #[must_use]
    pub fn code(&self) -> ReplyCode {
        self.entry().0
    }

    /// Returns the reply text.
    #[must_use]
    pub fn text(&self) -> &str {
        self.entry().1
    }

    /// Builds the reply sent to the client.
    #[must_use]
    pub fn reply(&self) -> Reply {
        let (code, text) = self.entry();
        Reply::single(code, text)
    }

    /// Returns true if the connection must be closed after replying.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.code() == ReplyCode::SERVICE_UNAVAILABLE
    }
}

/// Error returned by [`Handler`](crate::Handler) hooks.
#[derive(Debug, thiserror::Error)]
pub enum HookError {
    /// Reject with a specific SMTP reply.
    #[error(transparent)]
    Reject(#[from] ProtocolError),

    /// Unexpected failure inside the hook.
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

/// Result type alias for hook methods.
pub type HookResult<T> = std::result::Result<T, HookError>;
