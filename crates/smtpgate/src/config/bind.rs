//! Host and port list parsing.
//!
//! Ports are comma-separated. One entry may carry several ports joined by
//! `:`. Entry *i* belongs to host *i*; hosts beyond the end of the port list
//! reuse its last entry.

use crate::error::{Error, Result};

/// Host marker that expands to every local interface address.
pub const WILDCARD_HOST: &str = "*";

/// One host and the ports it listens on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindSpec {
    /// Host name, IP literal or [`WILDCARD_HOST`].
    pub host: String,
    /// Ports to bind on every address of `host`.
    pub ports: Vec<u16>,
}

/// Parses a host list such as `"127.0.0.1, [::1], mx.example.com"`.
///
/// An empty list means all interfaces.
pub(crate) fn parse_hosts(spec: &str) -> Result<Vec<String>> {
    if spec.trim().is_empty() {
        return Ok(vec![WILDCARD_HOST.to_string()]);
    }
    spec.split(',')
        .map(|entry| {
            let entry = entry.trim();
            if entry.is_empty() {
                return Err(Error::config(format!("empty entry in host list {spec:?}")));
            }
            let entry = entry
                .strip_prefix('[')
                .and_then(|inner| inner.strip_suffix(']'))
                .unwrap_or(entry);
            Ok(entry.to_string())
        })
        .collect()
}

/// Parses a port list such as `"2525:3535, 4545"`.
pub(crate) fn parse_ports(spec: &str) -> Result<Vec<Vec<u16>>> {
    if spec.trim().is_empty() {
        return Err(Error::config("port list must not be empty"));
    }
    spec.split(',')
        .map(|entry| {
            let entry = entry.trim();
            if entry.is_empty() {
                return Err(Error::config(format!("empty entry in port list {spec:?}")));
            }
            entry
                .split(':')
                .map(|port| {
                    port.trim()
                        .parse::<u16>()
                        .map_err(|_| Error::config(format!("invalid port {port:?} in {spec:?}")))
                })
                .collect()
        })
        .collect()
}

/// Pairs every host with its port entry.
pub(crate) fn pair(hosts: &[String], ports: &[Vec<u16>]) -> Vec<BindSpec> {
    hosts
        .iter()
        .enumerate()
        .filter_map(|(i, host)| {
            let ports = ports.get(i).or_else(|| ports.last())?;
            Some(BindSpec {
                host: host.clone(),
                ports: ports.clone(),
            })
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn hosts_are_trimmed_and_unbracketed() {
        let hosts = parse_hosts(" 127.0.0.1 , [::1],mx.example.com").unwrap();
        assert_eq!(hosts, vec!["127.0.0.1", "::1", "mx.example.com"]);
    }

    #[test]
    fn empty_host_list_is_wildcard() {
        assert_eq!(parse_hosts("  ").unwrap(), vec![WILDCARD_HOST]);
    }

    #[test]
    fn empty_host_entry_is_rejected() {
        assert!(matches!(parse_hosts("127.0.0.1, ,::1"), Err(Error::Config(_))));
    }

    #[test]
    fn ports_group_with_colon() {
        let ports = parse_ports("2525:3535, 4545").unwrap();
        assert_eq!(ports, vec![vec![2525, 3535], vec![4545]]);
    }

    #[test]
    fn invalid_ports_are_rejected() {
        assert!(parse_ports("").is_err());
        assert!(parse_ports("2525,").is_err());
        assert!(parse_ports("25x").is_err());
        assert!(parse_ports("70000").is_err());
        assert!(parse_ports("2525::3535").is_err());
    }

    #[test]
    fn last_port_entry_is_reused() {
        let hosts = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let specs = pair(&hosts, &[vec![25, 2525], vec![587]]);
        assert_eq!(
            specs,
            vec![
                BindSpec { host: "a".to_string(), ports: vec![25, 2525] },
                BindSpec { host: "b".to_string(), ports: vec![587] },
                BindSpec { host: "c".to_string(), ports: vec![587] },
            ]
        );
    }
}
