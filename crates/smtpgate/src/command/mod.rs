//! SMTP command parser.
//!
//! Keywords are matched case-insensitively. Commands without arguments
//! (`NOOP`, `RSET`, `QUIT`, `DATA`, `STARTTLS`) reject trailing text, which
//! leaves such lines to the unknown-line hook.

use crate::types::AuthMechanism;

/// SMTP command received from a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// HELO - Simple greeting
    Helo {
        /// Client hostname, possibly empty
        hostname: String,
    },
    /// EHLO - Extended greeting
    Ehlo {
        /// Client hostname, possibly empty
        hostname: String,
    },
    /// STARTTLS - Upgrade to TLS
    StartTls,
    /// AUTH - Begin authentication
    Auth {
        /// Authentication mechanism
        mechanism: AuthMechanism,
        /// Initial response
        initial_response: Option<String>,
    },
    /// MAIL FROM - Start mail transaction
    MailFrom {
        /// Everything after the colon, trimmed (path plus parameters)
        argument: String,
    },
    /// RCPT TO - Add recipient
    RcptTo {
        /// Everything after the colon, trimmed
        argument: String,
    },
    /// DATA - Begin message data
    Data,
    /// RSET - Reset transaction
    Rset,
    /// NOOP - No operation
    Noop,
    /// QUIT - Close connection
    Quit,
    /// PROXY - Proxy protocol v1 preamble
    Proxy {
        /// Text after the keyword, trimmed
        payload: String,
    },
    /// Anything else, kept verbatim
    Unknown(String),
}

impl Command {
    /// Parses one command line (without its line terminator).
    #[must_use]
    pub fn parse(line: &str) -> Self {
        let trimmed = line.trim_start();
        let (keyword, rest) = trimmed
            .split_once(char::is_whitespace)
            .unwrap_or((trimmed, ""));
        let rest = rest.trim();
        let keyword = keyword.to_ascii_uppercase();

        match keyword.as_str() {
            "HELO" => Self::Helo {
                hostname: rest.to_string(),
            },
            "EHLO" => Self::Ehlo {
                hostname: rest.to_string(),
            },
            "STARTTLS" if rest.is_empty() => Self::StartTls,
            "DATA" if rest.is_empty() => Self::Data,
            "RSET" if rest.is_empty() => Self::Rset,
            "NOOP" if rest.is_empty() => Self::Noop,
            "QUIT" if rest.is_empty() => Self::Quit,
            "AUTH" => parse_auth(rest).unwrap_or_else(|| Self::Unknown(line.to_string())),
            "PROXY" if !rest.is_empty() => Self::Proxy {
                payload: rest.to_string(),
            },
            "MAIL" => strip_path_keyword(rest, "FROM:").map_or_else(
                || Self::Unknown(line.to_string()),
                |argument| Self::MailFrom { argument },
            ),
            "RCPT" => strip_path_keyword(rest, "TO:").map_or_else(
                || Self::Unknown(line.to_string()),
                |argument| Self::RcptTo { argument },
            ),
            _ => Self::Unknown(line.to_string()),
        }
    }

    /// Returns true for commands that must not be logged verbatim.
    #[must_use]
    pub const fn carries_credentials(&self) -> bool {
        matches!(
            self,
            Self::Auth {
                initial_response: Some(_),
                ..
            }
        )
    }
}

fn parse_auth(rest: &str) -> Option<Command> {
    let mut parts = rest.split_whitespace();
    let mechanism = AuthMechanism::parse(parts.next()?)?;
    let initial_response = parts.next().map(str::to_string);
    if parts.next().is_some() {
        return None;
    }
    if mechanism == AuthMechanism::CramMd5 && initial_response.is_some() {
        return None;
    }
    Some(Command::Auth {
        mechanism,
        initial_response,
    })
}

/// Strips `FROM:`/`TO:` from the text after `MAIL`/`RCPT`.
fn strip_path_keyword(rest: &str, keyword: &str) -> Option<String> {
    let head = rest.get(..keyword.len())?;
    if !head.eq_ignore_ascii_case(keyword) {
        return None;
    }
    Some(rest[keyword.len()..].trim().to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_helo_and_ehlo() {
        assert_eq!(
            Command::parse("HELO client.example.com"),
            Command::Helo {
                hostname: "client.example.com".to_string()
            }
        );
        assert_eq!(
            Command::parse("ehlo   test  "),
            Command::Ehlo {
                hostname: "test".to_string()
            }
        );
        assert_eq!(
            Command::parse("EHLO"),
            Command::Ehlo {
                hostname: String::new()
            }
        );
    }

    #[test]
    fn test_keyword_must_be_whole_word() {
        assert_eq!(
            Command::parse("HELOX foo"),
            Command::Unknown("HELOX foo".to_string())
        );
    }

    #[test]
    fn test_argumentless_commands() {
        assert_eq!(Command::parse("NOOP"), Command::Noop);
        assert_eq!(Command::parse("rset "), Command::Rset);
        assert_eq!(Command::parse("Quit"), Command::Quit);
        assert_eq!(Command::parse("DATA"), Command::Data);
        assert_eq!(Command::parse("STARTTLS"), Command::StartTls);
    }

    #[test]
    fn test_argumentless_commands_reject_arguments() {
        assert_eq!(
            Command::parse("NOOP please"),
            Command::Unknown("NOOP please".to_string())
        );
        assert_eq!(
            Command::parse("DATA now"),
            Command::Unknown("DATA now".to_string())
        );
    }

    #[test]
    fn test_mail_from() {
        assert_eq!(
            Command::parse("MAIL FROM:<a@b>"),
            Command::MailFrom {
                argument: "<a@b>".to_string()
            }
        );
        assert_eq!(
            Command::parse("mail from: <a@b> BODY=8BITMIME"),
            Command::MailFrom {
                argument: "<a@b> BODY=8BITMIME".to_string()
            }
        );
        assert_eq!(
            Command::parse("MAIL <a@b>"),
            Command::Unknown("MAIL <a@b>".to_string())
        );
    }

    #[test]
    fn test_rcpt_to() {
        assert_eq!(
            Command::parse("RCPT TO:<c@d>"),
            Command::RcptTo {
                argument: "<c@d>".to_string()
            }
        );
        assert_eq!(
            Command::parse("RCPT T"),
            Command::Unknown("RCPT T".to_string())
        );
    }

    #[test]
    fn test_auth() {
        assert_eq!(
            Command::parse("AUTH PLAIN"),
            Command::Auth {
                mechanism: AuthMechanism::Plain,
                initial_response: None
            }
        );
        assert_eq!(
            Command::parse("auth login dXNlcg=="),
            Command::Auth {
                mechanism: AuthMechanism::Login,
                initial_response: Some("dXNlcg==".to_string())
            }
        );
        assert_eq!(
            Command::parse("AUTH CRAM-MD5"),
            Command::Auth {
                mechanism: AuthMechanism::CramMd5,
                initial_response: None
            }
        );
    }

    #[test]
    fn test_auth_malformed_is_unknown() {
        for line in ["AUTH", "AUTH XOAUTH2 abc", "AUTH PLAIN a b", "AUTH CRAM-MD5 abc"] {
            assert_eq!(Command::parse(line), Command::Unknown(line.to_string()));
        }
    }

    #[test]
    fn test_auth_initial_response_is_sensitive() {
        assert!(Command::parse("AUTH PLAIN AGEAYg==").carries_credentials());
        assert!(!Command::parse("AUTH PLAIN").carries_credentials());
        assert!(!Command::parse("MAIL FROM:<a@b>").carries_credentials());
    }

    #[test]
    fn test_proxy() {
        assert_eq!(
            Command::parse("PROXY TCP4 1.1.1.1 2.2.2.2 1111 2222"),
            Command::Proxy {
                payload: "TCP4 1.1.1.1 2.2.2.2 1111 2222".to_string()
            }
        );
        assert_eq!(Command::parse("PROXY"), Command::Unknown("PROXY".to_string()));
    }

    #[test]
    fn test_non_ascii_input_does_not_panic() {
        assert_eq!(
            Command::parse("MAIL \u{e9}\u{e9}"),
            Command::Unknown("MAIL \u{e9}\u{e9}".to_string())
        );
        assert_eq!(Command::parse(""), Command::Unknown(String::new()));
    }

    fn mixed_case(word: &'static str) -> impl Strategy<Value = String> {
        proptest::collection::vec(any::<bool>(), word.len()).prop_map(move |flags| {
            word.chars()
                .zip(flags)
                .map(|(c, upper)| {
                    if upper {
                        c.to_ascii_uppercase()
                    } else {
                        c.to_ascii_lowercase()
                    }
                })
                .collect()
        })
    }

    proptest! {
        #[test]
        fn keywords_are_case_insensitive(noop in mixed_case("NOOP"), quit in mixed_case("QUIT")) {
            prop_assert_eq!(Command::parse(&noop), Command::Noop);
            prop_assert_eq!(Command::parse(&quit), Command::Quit);
        }

        #[test]
        fn mail_from_keeps_argument(
            keyword in mixed_case("FROM:"),
            local in "[a-z]{1,8}",
            domain in "[a-z]{1,8}",
        ) {
            let line = format!("MAIL {keyword}<{local}@{domain}>");
            prop_assert_eq!(
                Command::parse(&line),
                Command::MailFrom { argument: format!("<{local}@{domain}>") }
            );
        }

        #[test]
        fn parse_never_panics(line in "\\PC*") {
            let _ = Command::parse(&line);
        }
    }
}
