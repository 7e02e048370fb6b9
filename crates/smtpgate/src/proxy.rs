//! PROXY protocol v1 preamble.
//!
//! ```text
//! PROXY TCP4 <src-ip> <dst-ip> <src-port> <dst-port>
//! PROXY TCP6 <src-ip> <dst-ip> <src-port> <dst-port>
//! PROXY UNKNOWN [anything]
//! ```

use std::net::{IpAddr, SocketAddr};

use crate::error::ProtocolError;

/// Address family announced by the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyFamily {
    /// TCP over IPv4.
    Tcp4,
    /// TCP over IPv6.
    Tcp6,
    /// The relay could not tell.
    Unknown,
}

/// Client and server endpoints as seen by a relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProxyRecord {
    /// Address family.
    pub family: ProxyFamily,
    /// Original client endpoint.
    pub source: Option<SocketAddr>,
    /// Endpoint the client connected to.
    pub destination: Option<SocketAddr>,
}

impl ProxyRecord {
    /// Parses the text following the `PROXY` keyword.
    ///
    /// # Errors
    ///
    /// Any malformed payload yields [`ProtocolError::ServiceUnavailable`],
    /// since a corrupt preamble means the relay cannot be trusted.
    pub fn parse(payload: &str) -> Result<Self, ProtocolError> {
        let mut parts = payload.split_whitespace();
        let family = match parts.next() {
            Some("TCP4") => ProxyFamily::Tcp4,
            Some("TCP6") => ProxyFamily::Tcp6,
            Some("UNKNOWN") => {
                return Ok(Self {
                    family: ProxyFamily::Unknown,
                    source: None,
                    destination: None,
                });
            }
            _ => return Err(ProtocolError::ServiceUnavailable),
        };

        let (Some(src_ip), Some(dst_ip), Some(src_port), Some(dst_port), None) = (
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
        ) else {
            return Err(ProtocolError::ServiceUnavailable);
        };

        let source = SocketAddr::new(parse_ip(family, src_ip)?, parse_port(src_port)?);
        let destination = SocketAddr::new(parse_ip(family, dst_ip)?, parse_port(dst_port)?);
        Ok(Self {
            family,
            source: Some(source),
            destination: Some(destination),
        })
    }
}

fn parse_ip(family: ProxyFamily, text: &str) -> Result<IpAddr, ProtocolError> {
    let ip: IpAddr = text
        .parse()
        .map_err(|_| ProtocolError::ServiceUnavailable)?;
    match (family, ip) {
        (ProxyFamily::Tcp4, IpAddr::V4(_)) | (ProxyFamily::Tcp6, IpAddr::V6(_)) => Ok(ip),
        _ => Err(ProtocolError::ServiceUnavailable),
    }
}

/// Decimal port; leading zeros are tolerated.
fn parse_port(text: &str) -> Result<u16, ProtocolError> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ProtocolError::ServiceUnavailable);
    }
    let trimmed = text.trim_start_matches('0');
    if trimmed.is_empty() {
        return Ok(0);
    }
    trimmed
        .parse()
        .map_err(|_| ProtocolError::ServiceUnavailable)
}
