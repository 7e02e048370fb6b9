//! SMTP extension types advertised in the EHLO reply.

use std::fmt;

/// Service extension advertised after EHLO.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Extension {
    /// 8BITMIME - 8-bit MIME transport
    EightBitMime,
    /// SMTPUTF8 - UTF-8 email addresses
    SmtpUtf8,
    /// PIPELINING - Command pipelining
    Pipelining,
    /// AUTH - Authentication
    Auth(Vec<AuthMechanism>),
    /// STARTTLS - TLS upgrade
    StartTls,
}

impl fmt::Display for Extension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EightBitMime => f.write_str("8BITMIME"),
            Self::SmtpUtf8 => f.write_str("SMTPUTF8"),
            Self::Pipelining => f.write_str("PIPELINING"),
            Self::Auth(mechanisms) => {
                f.write_str("AUTH")?;
                for mechanism in mechanisms {
                    write!(f, " {}", mechanism.as_str())?;
                }
                Ok(())
            }
            Self::StartTls => f.write_str("STARTTLS"),
        }
    }
}

/// SASL authentication mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthMechanism {
    /// PLAIN - plaintext authentication
    Plain,
    /// LOGIN - legacy plaintext
    Login,
    /// CRAM-MD5 - challenge-response, recognized only to be refused
    CramMd5,
}

impl AuthMechanism {
    /// Mechanisms offered in the EHLO reply.
    pub const ADVERTISED: [Self; 2] = [Self::Login, Self::Plain];

    /// Parses an authentication mechanism name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "PLAIN" => Some(Self::Plain),
            "LOGIN" => Some(Self::Login),
            "CRAM-MD5" => Some(Self::CramMd5),
            _ => None,
        }
    }

    /// Returns the mechanism name as a string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Plain => "PLAIN",
            Self::Login => "LOGIN",
            Self::CramMd5 => "CRAM-MD5",
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn display_keywords() {
        assert_eq!(Extension::EightBitMime.to_string(), "8BITMIME");
        assert_eq!(Extension::SmtpUtf8.to_string(), "SMTPUTF8");
        assert_eq!(Extension::Pipelining.to_string(), "PIPELINING");
        assert_eq!(Extension::StartTls.to_string(), "STARTTLS");
    }

    #[test]
    fn display_advertised_auth() {
        let ext = Extension::Auth(AuthMechanism::ADVERTISED.to_vec());
        assert_eq!(ext.to_string(), "AUTH LOGIN PLAIN");
    }

    #[test]
    fn mechanism_parse_is_case_insensitive() {
        assert_eq!(AuthMechanism::parse("plain"), Some(AuthMechanism::Plain));
        assert_eq!(AuthMechanism::parse("Cram-Md5"), Some(AuthMechanism::CramMd5));
        assert_eq!(AuthMechanism::parse("XOAUTH2"), None);
    }
}
