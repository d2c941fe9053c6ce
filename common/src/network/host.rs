//! # Host Model
//!
//! Everything scope-related works on a [`Host`], which can be:
//! * A DNS name (e.g., `www.evilcorp.com`).
//! * A single IP address (e.g., `1.2.3.4` or `::1`).
//! * A CIDR block (e.g., `1.2.3.0/24`), always stored by its network address.
//!
//! Parsing is lenient about decoration: URLs, `host:port` pairs, trailing dots
//! and upper-case letters are reduced to the bare host.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use ipnetwork::IpNetwork;

use crate::error::ScopeError;
use crate::network::range;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Host {
    Dns(String),
    Ip(IpAddr),
    Network(IpNetwork),
}

impl Host {
    pub fn is_dns(&self) -> bool {
        matches!(self, Host::Dns(_))
    }

    /// The host as an IP network (`/32` or `/128` for single addresses).
    pub fn as_network(&self) -> Option<IpNetwork> {
        match self {
            Host::Dns(_) => None,
            Host::Ip(ip) => Some(IpNetwork::from(*ip)),
            Host::Network(net) => Some(*net),
        }
    }

    /// The host name reversed, used for suffix lookups in external stores.
    pub fn reversed(&self) -> String {
        self.to_string().chars().rev().collect()
    }

    /// Every parent domain of a DNS name, nearest first.
    ///
    /// `a.b.evilcorp.com` yields `b.evilcorp.com`, `evilcorp.com`, `com`.
    pub fn parent_domains(&self) -> Vec<&str> {
        let Host::Dns(name) = self else {
            return Vec::new();
        };
        name.match_indices('.')
            .map(|(idx, _)| &name[idx + 1..])
            .filter(|parent| !parent.is_empty())
            .collect()
    }
}

impl FromStr for Host {
    type Err = ScopeError;

    /// Parses a string into a `Host`.
    ///
    /// Supported formats:
    /// * **CIDR**: "1.2.3.4/24" (normalized to "1.2.3.0/24", full-length prefixes become an IP).
    /// * **IP**: "1.2.3.4", "::1", "[::1]:443".
    /// * **DNS**: "www.evilcorp.com", "WWW.EvilCorp.com.", "evilcorp.com:8443".
    /// * **URL**: "https://www.evilcorp.com/path" (the authority is used).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = strip_url(s.trim());
        if trimmed.is_empty() {
            return Err(ScopeError::Empty);
        }

        if trimmed.contains('/') {
            return parse_network(trimmed);
        }

        if let Some(ip) = parse_ip(trimmed) {
            return Ok(Host::Ip(ip));
        }

        parse_dns(trimmed).map(Host::Dns)
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Host::Dns(name) => write!(f, "{name}"),
            Host::Ip(ip) => write!(f, "{ip}"),
            Host::Network(net) => write!(f, "{}", range::network_to_string(net)),
        }
    }
}

/// Reduces `scheme://user@host:port/path` to `host:port`.
fn strip_url(s: &str) -> &str {
    let Some((_scheme, rest)) = s.split_once("://") else {
        return s;
    };
    let authority = rest.split(['/', '?', '#']).next().unwrap_or(rest);
    match authority.rsplit_once('@') {
        Some((_userinfo, host)) => host,
        None => authority,
    }
}

fn parse_network(s: &str) -> Result<Host, ScopeError> {
    let net = IpNetwork::from_str(s).map_err(|e| ScopeError::InvalidNetwork {
        input: s.to_string(),
        reason: e.to_string(),
    })?;
    let net = range::normalize(net);
    if range::is_single_address(&net) {
        return Ok(Host::Ip(net.network()));
    }
    Ok(Host::Network(net))
}

fn parse_ip(s: &str) -> Option<IpAddr> {
    if let Ok(ip) = s.parse::<IpAddr>() {
        return Some(ip);
    }
    // "[::1]:443"
    if let Some(inner) = s.strip_prefix('[') {
        let (addr, _port) = inner.split_once(']')?;
        return addr.parse::<IpAddr>().ok();
    }
    // "1.2.3.4:443"
    let (addr, port) = s.rsplit_once(':')?;
    port.parse::<u16>().ok()?;
    addr.parse::<IpAddr>().ok().filter(|ip| ip.is_ipv4())
}

fn parse_dns(s: &str) -> Result<String, ScopeError> {
    let without_port = match s.rsplit_once(':') {
        Some((name, port)) if port.parse::<u16>().is_ok() => name,
        _ => s,
    };
    let name = without_port.trim_end_matches('.').to_ascii_lowercase();

    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '*'));
    let valid_labels = name.split('.').all(|label| !label.is_empty());

    if name.is_empty() || !valid_chars || !valid_labels {
        return Err(ScopeError::InvalidHost(s.to_string()));
    }
    Ok(name)
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_from_str_full_parsing() {
        assert_eq!(
            Host::from_str("WWW.EvilCorp.com.").unwrap(),
            Host::Dns("www.evilcorp.com".into())
        );
        assert_eq!(
            Host::from_str("https://admin@www.evilcorp.com:8443/login?x=1").unwrap(),
            Host::Dns("www.evilcorp.com".into())
        );
        assert_eq!(
            Host::from_str("1.2.3.4").unwrap(),
            Host::Ip(IpAddr::V4(Ipv4Addr::new(1, 2, 3, 4)))
        );
        assert_eq!(
            Host::from_str("1.2.3.4:443").unwrap(),
            Host::Ip(IpAddr::V4(Ipv4Addr::new(1, 2, 3, 4)))
        );
        assert!(matches!(Host::from_str("[::1]:443"), Ok(Host::Ip(_))));
        assert!(matches!(Host::from_str("::1"), Ok(Host::Ip(_))));

        // Test invalid
        assert!(Host::from_str("").is_err());
        assert!(Host::from_str("evil corp.com").is_err());
        assert!(Host::from_str("evilcorp..com").is_err());
        assert!(Host::from_str("10.0.0.1/33").is_err());
    }

    #[test]
    fn networks_are_normalized() {
        let host = Host::from_str("1.2.3.4/24").unwrap();
        assert_eq!(host.to_string(), "1.2.3.0/24");

        let single = Host::from_str("1.2.3.4/32").unwrap();
        assert_eq!(single, Host::Ip(IpAddr::V4(Ipv4Addr::new(1, 2, 3, 4))));
    }

    #[test]
    fn parent_domains_nearest_first() {
        let host = Host::from_str("a.b.evilcorp.com").unwrap();
        assert_eq!(host.parent_domains(), vec!["b.evilcorp.com", "evilcorp.com", "com"]);
        assert!(Host::from_str("1.2.3.4").unwrap().parent_domains().is_empty());
    }

    #[test]
    fn reversed_host() {
        let host = Host::from_str("evilcorp.com").unwrap();
        assert_eq!(host.reversed(), "moc.proclive");
    }
}
