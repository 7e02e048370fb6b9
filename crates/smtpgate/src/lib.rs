//! # smtpgate
//!
//! An embeddable SMTP server engine implementing the receiving side of
//! RFC 5321.
//!
//! The engine accepts connections, runs the SMTP dialog and hands envelopes
//! and messages to a caller-supplied [`Handler`]. Routing, queuing and
//! delivery are the caller's concern.
//!
//! ## Features
//!
//! - **Concurrency governor**: open connections and concurrently processing
//!   sessions are bounded independently
//! - **STARTTLS**: from PEM files or a generated self-signed certificate
//! - **Authentication**: PLAIN and LOGIN, verified by the handler
//! - **Extensions**: PIPELINING, 8BITMIME, SMTPUTF8, PROXY protocol v1
//! - **Line policies**: lenient, terminator-preserving or strict CRLF
//!
//! ## Quick Start
//!
//! ```ignore
//! use smtpgate::{Config, Context, Handler, HookResult, Server};
//!
//! struct Printer;
//!
//! impl Handler for Printer {
//!     async fn on_message_data(&self, ctx: &mut Context) -> HookResult<()> {
//!         let envelope = &ctx.envelope;
//!         println!("{} -> {:?}: {} bytes", envelope.from, envelope.to, ctx.message.bytesize);
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> smtpgate::Result<()> {
//!     let config = Config::builder().hosts("127.0.0.1").ports("2525").build()?;
//!     let mut server = Server::new(config, Printer);
//!     server.start().await?;
//!     server.join().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Command Sequence
//!
//! ```text
//! HELO ──EHLO/HELO──→ RSET ──MAIL──→ MAIL ──RCPT──→ RCPT ──DATA──→ DATA
//!                      ↑ │                                          │
//!                      │ ├─AUTH──→ (challenge) ──→ RSET             │
//!                      │ └─STARTTLS──→ (handshake) ──→ HELO         │
//!                      └───────────────────── "." ──────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`command`]: Command line parser
//! - [`config`]: Server configuration
//! - [`connection`]: Line reader and session streams
//! - [`dispatch`]: Protocol state machine
//! - [`session`]: Per-connection context
//! - [`tls`]: STARTTLS transport and certificates
//! - [`types`]: Replies and extensions

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod command;
pub mod config;
pub mod connection;
pub mod dispatch;
mod error;
mod handler;
pub mod proxy;
mod server;
pub mod session;
pub mod tls;
pub mod types;

pub use config::{AuthMode, Config, ConfigBuilder, CrlfMode, ProxyPolicy, TlsMode};
pub use dispatch::Dispatcher;
pub use error::{Error, HookError, HookResult, ProtocolError, Result};
pub use handler::{Handler, LoggingHandler, NoopHandler};
pub use server::Server;
pub use session::{Context, Session};
pub use types::{AuthMechanism, Extension, Reply, ReplyCode};
