//! Per-connection session context handed to every hook.

use std::net::{IpAddr, SocketAddr};

use chrono::{DateTime, Utc};

use crate::connection::LineBreak;
use crate::error::ProtocolError;
use crate::proxy::ProxyRecord;
use crate::types::ReplyCode;

/// Mutable record of one connection.
#[derive(Debug, Clone, Default)]
pub struct Context {
    /// Connection-level facts, set once at connect.
    pub server: ServerContext,
    /// Current transaction envelope.
    pub envelope: Envelope,
    /// Current message.
    pub message: Message,
}

/// Connection-level facts.
#[derive(Debug, Clone, Default)]
pub struct ServerContext {
    /// Local host name (reverse DNS or numeric address).
    pub local_host: String,
    /// Local socket address.
    pub local_addr: Option<SocketAddr>,
    /// Text of the `220` greeting.
    pub local_response: String,
    /// Remote host name (reverse DNS or numeric address).
    pub remote_host: String,
    /// Remote socket address.
    pub remote_addr: Option<SocketAddr>,
    /// Argument of the accepted HELO/EHLO.
    pub helo: String,
    /// Text of the HELO/EHLO reply.
    pub helo_response: String,
    /// When the connection was accepted.
    pub connected: Option<DateTime<Utc>>,
    /// Number of protocol errors replied so far.
    pub exceptions: u32,
    /// Every protocol error replied so far.
    pub errors: Vec<ErrorRecord>,
    /// Authorization identity after a successful AUTH.
    pub authorization_id: String,
    /// Authentication identity after a successful AUTH.
    pub authentication_id: String,
    /// When AUTH succeeded.
    pub authenticated: Option<DateTime<Utc>>,
    /// When the STARTTLS handshake completed.
    pub encrypted: Option<DateTime<Utc>>,
    /// Most recent PROXY record.
    pub proxy: Option<ProxyRecord>,
    /// Every PROXY record, in arrival order.
    pub proxies: Vec<ProxyRecord>,
}

impl ServerContext {
    /// Local IP address.
    #[must_use]
    pub fn local_ip(&self) -> Option<IpAddr> {
        self.local_addr.map(|addr| addr.ip())
    }

    /// Local port.
    #[must_use]
    pub fn local_port(&self) -> Option<u16> {
        self.local_addr.map(|addr| addr.port())
    }

    /// Remote IP address.
    #[must_use]
    pub fn remote_ip(&self) -> Option<IpAddr> {
        self.remote_addr.map(|addr| addr.ip())
    }

    /// Remote port.
    #[must_use]
    pub fn remote_port(&self) -> Option<u16> {
        self.remote_addr.map(|addr| addr.port())
    }

    /// Returns true after a successful AUTH.
    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        self.authenticated.is_some()
    }

    /// Returns true after a successful STARTTLS.
    #[must_use]
    pub const fn is_encrypted(&self) -> bool {
        self.encrypted.is_some()
    }
}

/// A protocol error as it was replied to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorRecord {
    /// When the error was replied.
    pub at: DateTime<Utc>,
    /// Reply code.
    pub code: ReplyCode,
    /// Reply text.
    pub text: String,
}

impl From<&ProtocolError> for ErrorRecord {
    fn from(err: &ProtocolError) -> Self {
        Self {
            at: Utc::now(),
            code: err.code(),
            text: err.text().to_string(),
        }
    }
}

/// `BODY=` parameter of MAIL FROM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyEncoding {
    /// `BODY=7BIT`
    SevenBit,
    /// `BODY=8BITMIME`
    EightBitMime,
}

/// Sender and recipients of one transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Envelope {
    /// MAIL FROM argument, or the hook's replacement.
    pub from: String,
    /// RCPT TO arguments in arrival order.
    pub to: Vec<String>,
    /// Declared body encoding.
    pub encoding_body: Option<BodyEncoding>,
    /// True if MAIL FROM carried `SMTPUTF8`.
    pub encoding_utf8: bool,
}

/// Message content of one transaction.
#[derive(Debug, Clone, Default)]
pub struct Message {
    /// When DATA was accepted.
    pub received: Option<DateTime<Utc>>,
    /// When the terminating dot arrived.
    pub delivered: Option<DateTime<Utc>>,
    /// Size of `data` at delivery.
    pub bytesize: usize,
    /// Length of the header block once the first blank line was seen.
    pub header_size: Option<usize>,
    /// Line terminator used to accumulate `data`.
    pub crlf: LineBreak,
    /// Dot-unstuffed message content.
    pub data: Vec<u8>,
}

impl Message {
    /// Returns true once the blank line ending the headers was received.
    #[must_use]
    pub const fn headers_seen(&self) -> bool {
        self.header_size.is_some()
    }

    /// The header block, including its trailing line breaks.
    #[must_use]
    pub fn headers(&self) -> Option<&[u8]> {
        self.header_size.and_then(|size| self.data.get(..size))
    }
}
