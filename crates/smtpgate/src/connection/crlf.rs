//! Line terminator policies.

use crate::config::CrlfMode;
use crate::error::ProtocolError;

/// Line terminator used when accumulating message data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LineBreak {
    /// `\r\n`
    #[default]
    CrLf,
    /// `\n`
    Lf,
}

impl LineBreak {
    /// Returns the terminator bytes.
    #[must_use]
    pub const fn as_bytes(self) -> &'static [u8] {
        match self {
            Self::CrLf => b"\r\n",
            Self::Lf => b"\n",
        }
    }
}

impl CrlfMode {
    /// Removes the terminator from a raw line and reports which one applies.
    ///
    /// # Errors
    ///
    /// In [`CrlfMode::Strict`], a line without a trailing CRLF yields
    /// [`ProtocolError::CrlfRequired`] and a CR anywhere else yields
    /// [`ProtocolError::CarriageReturnInLine`].
    pub fn normalize(self, mut line: Vec<u8>) -> Result<(Vec<u8>, LineBreak), ProtocolError> {
        match self {
            Self::Ensure => {
                line.retain(|&b| b != b'\r' && b != b'\n');
                Ok((line, LineBreak::CrLf))
            }
            Self::Leave => {
                let line_break = if line.ends_with(b"\r\n") {
                    LineBreak::CrLf
                } else {
                    LineBreak::Lf
                };
                chomp(&mut line);
                Ok((line, line_break))
            }
            Self::Strict => {
                if !line.ends_with(b"\r\n") {
                    return Err(ProtocolError::CrlfRequired);
                }
                line.truncate(line.len() - 2);
                if line.contains(&b'\r') {
                    return Err(ProtocolError::CarriageReturnInLine);
                }
                Ok((line, LineBreak::CrLf))
            }
        }
    }
}

/// Drops one trailing `\r\n`, `\n` or `\r`.
pub(crate) fn chomp(data: &mut Vec<u8>) {
    if data.ends_with(b"\r\n") {
        data.truncate(data.len() - 2);
    } else if data.ends_with(b"\n") || data.ends_with(b"\r") {
        data.truncate(data.len() - 1);
    }
}
