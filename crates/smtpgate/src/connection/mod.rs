//! Session transport: line reading, terminator policies and TLS upgrade.

mod crlf;
mod line_reader;
mod stream;

pub use crlf::LineBreak;
pub(crate) use crlf::chomp;
pub use line_reader::LineReader;
pub use stream::{Rewind, SessionStream};
