//! Listener address resolution and reverse DNS.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use hickory_resolver::TokioAsyncResolver;

use crate::config::{BindSpec, WILDCARD_HOST};

/// Resolves every host and port pair to socket addresses.
///
/// A host that cannot be resolved is logged and skipped.
pub(crate) async fn bind_addresses(specs: &[BindSpec]) -> Vec<SocketAddr> {
    let mut addrs = Vec::new();
    for spec in specs {
        let ips = if spec.host == WILDCARD_HOST {
            interface_addresses()
        } else {
            match tokio::net::lookup_host((spec.host.as_str(), 0)).await {
                Ok(resolved) => resolved.map(|addr| addr.ip()).collect(),
                Err(err) => {
                    tracing::error!(host = %spec.host, error = %err, "cannot resolve listen host");
                    continue;
                }
            }
        };
        for port in &spec.ports {
            for ip in &ips {
                let addr = SocketAddr::new(*ip, *port);
                if !addrs.contains(&addr) {
                    addrs.push(addr);
                }
            }
        }
    }
    addrs
}

/// Addresses of all local interfaces that can be bound without a scope.
#[cfg(unix)]
fn interface_addresses() -> Vec<IpAddr> {
    use std::net::{SocketAddrV4, SocketAddrV6};

    let ifaddrs = match nix::ifaddrs::getifaddrs() {
        Ok(ifaddrs) => ifaddrs,
        Err(err) => {
            tracing::warn!(
                error = %err,
                "cannot enumerate interfaces, listening on unspecified addresses"
            );
            return unspecified_addresses();
        }
    };

    let mut ips = Vec::new();
    for ifaddr in ifaddrs {
        let Some(address) = ifaddr.address else {
            continue;
        };
        let ip = if let Some(sin) = address.as_sockaddr_in() {
            IpAddr::V4(*SocketAddrV4::from(*sin).ip())
        } else if let Some(sin6) = address.as_sockaddr_in6() {
            IpAddr::V6(*SocketAddrV6::from(*sin6).ip())
        } else {
            continue;
        };
        if bindable(ip) && !ips.contains(&ip) {
            ips.push(ip);
        }
    }
    ips
}

#[cfg(not(unix))]
fn interface_addresses() -> Vec<IpAddr> {
    unspecified_addresses()
}

fn unspecified_addresses() -> Vec<IpAddr> {
    vec![
        IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    ]
}

fn bindable(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => !v4.is_unspecified() && !v4.is_multicast(),
        IpAddr::V6(v6) => {
            let link_local = (v6.segments()[0] & 0xffc0) == 0xfe80;
            !v6.is_unspecified()
                && !v6.is_multicast()
                && !link_local
                && v6.to_ipv4_mapped().is_none()
        }
    }
}

/// Reverse resolver shared by all sessions of a server.
#[derive(Clone)]
pub(crate) struct ReverseDns {
    resolver: TokioAsyncResolver,
}

impl std::fmt::Debug for ReverseDns {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReverseDns").finish_non_exhaustive()
    }
}

impl ReverseDns {
    /// Builds a resolver from the system configuration.
    pub(crate) fn from_system_conf() -> Option<Self> {
        match TokioAsyncResolver::tokio_from_system_conf() {
            Ok(resolver) => Some(Self { resolver }),
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    "reverse DNS disabled: cannot read resolver configuration"
                );
                None
            }
        }
    }

    /// Returns the host name for `ip`, or its numeric form if there is none.
    pub(crate) async fn host_name(&self, ip: IpAddr) -> String {
        match self.resolver.reverse_lookup(ip).await {
            Ok(lookup) => lookup.iter().next().map_or_else(
                || ip.to_string(),
                |name| name.to_string().trim_end_matches('.').to_string(),
            ),
            Err(err) => {
                tracing::debug!(%ip, error = %err, "reverse lookup failed");
                ip.to_string()
            }
        }
    }
}
