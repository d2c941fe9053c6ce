//! # Scope Sets
//!
//! A [`ScopeSet`] is an unordered collection of DNS names and IP networks that
//! answers "is this host covered?". DNS names match exactly or, when not
//! strict, by suffix. Networks always match by containment.
//!
//! Networks are kept collapsed: a block already covered by another one in the
//! set is never stored twice, so `1.2.3.16/28` disappears next to `1.2.3.0/24`.

use std::collections::BTreeSet;
use std::str::FromStr;

use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};

use crate::error::ScopeError;
use crate::network::host::Host;
use crate::network::range;
use crate::utils::hash;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct ScopeSet {
    dns: BTreeSet<String>,
    networks: Vec<IpNetwork>,
}

impl ScopeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a set from strings, failing on the first one that is not a host.
    pub fn parse<I, S>(items: I) -> Result<Self, ScopeError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self::new();
        for item in items {
            set.add_str(item.as_ref())?;
        }
        Ok(set)
    }

    pub fn add_str(&mut self, s: &str) -> Result<bool, ScopeError> {
        Ok(self.add(Host::from_str(s)?))
    }

    /// Adds a host, returning whether the set changed.
    pub fn add(&mut self, host: Host) -> bool {
        match host {
            Host::Dns(name) => self.dns.insert(name),
            other => match other.as_network() {
                Some(net) => self.add_network(net),
                None => false,
            },
        }
    }

    fn add_network(&mut self, net: IpNetwork) -> bool {
        let net = range::normalize(net);
        if self.networks.iter().any(|existing| range::covers(existing, &net)) {
            return false;
        }
        self.networks.retain(|existing| !range::covers(&net, existing));
        self.networks.push(net);
        self.networks
            .sort_by_key(|n| (n.is_ipv6(), range::network_to_string(n)));
        true
    }

    pub fn merge(&mut self, other: &ScopeSet) {
        for name in &other.dns {
            self.dns.insert(name.clone());
        }
        for net in &other.networks {
            self.add_network(*net);
        }
    }

    /// Whether `host` is covered by this set.
    ///
    /// With `strict` set, DNS names must match exactly. IP containment is unaffected.
    pub fn contains(&self, host: &Host, strict: bool) -> bool {
        match host {
            Host::Dns(name) => {
                if self.dns.contains(name) {
                    return true;
                }
                !strict
                    && host
                        .parent_domains()
                        .iter()
                        .any(|parent| self.dns.contains(*parent))
            }
            Host::Ip(ip) => self.networks.iter().any(|net| range::contains_ip(net, *ip)),
            Host::Network(candidate) => self
                .networks
                .iter()
                .any(|net| range::covers(net, candidate)),
        }
    }

    /// String flavour of [`ScopeSet::contains`]; unparsable input is never covered.
    pub fn matches(&self, host: &str, strict: bool) -> bool {
        Host::from_str(host)
            .map(|host| self.contains(&host, strict))
            .unwrap_or(false)
    }

    pub fn is_empty(&self) -> bool {
        self.dns.is_empty() && self.networks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.dns.len() + self.networks.len()
    }

    pub fn hosts(&self) -> Vec<Host> {
        self.dns
            .iter()
            .map(|name| Host::Dns(name.clone()))
            .chain(self.networks.iter().map(|net| {
                if range::is_single_address(net) {
                    Host::Ip(net.network())
                } else {
                    Host::Network(*net)
                }
            }))
            .collect()
    }

    /// Sorted string form of every entry.
    pub fn entries(&self) -> Vec<String> {
        let mut entries: Vec<String> = self.hosts().iter().map(Host::to_string).collect();
        entries.sort();
        entries
    }

    /// Stable content hash, independent of insertion order.
    pub fn hash(&self) -> String {
        hash::set_hash(self.entries())
    }
}

impl TryFrom<Vec<String>> for ScopeSet {
    type Error = ScopeError;

    fn try_from(items: Vec<String>) -> Result<Self, Self::Error> {
        Self::parse(items)
    }
}

impl From<ScopeSet> for Vec<String> {
    fn from(set: ScopeSet) -> Self {
        set.entries()
    }
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

    #[test]
    fn dns_suffix_matching_respects_strictness() {
        let set = ScopeSet::parse(["evilcorp.com"]).unwrap();
        assert!(set.matches("evilcorp.com", true));
        assert!(!set.matches("a.evilcorp.com", true));
        assert!(set.matches("a.evilcorp.com", false));
        assert!(!set.matches("notevilcorp.com", false));
    }

    #[test]
    fn cidr_containment() {
        let set = ScopeSet::parse(["1.2.3.0/24"]).unwrap();
        assert!(set.matches("1.2.3.4", true));
        assert!(set.matches("1.2.3.4/28", true));
        assert!(set.matches("1.2.3.4/24", true));
        assert!(!set.matches("1.2.3.4/23", false));
        assert!(!set.matches("1.2.4.1", false));
        assert!(!set.matches("www.evilcorp.com", false));
    }

    #[test]
    fn redundant_networks_collapse() {
        let mut set = ScopeSet::parse(["1.2.3.0/24"]).unwrap();
        assert!(!set.add_str("1.2.3.16/28").unwrap());
        assert!(!set.add_str("1.2.3.7").unwrap());
        assert_eq!(set.entries(), vec!["1.2.3.0/24"]);

        let mut set = ScopeSet::parse(["1.2.3.16/28", "1.2.3.200"]).unwrap();
        assert!(set.add_str("1.2.3.0/24").unwrap());
        assert_eq!(set.entries(), vec!["1.2.3.0/24"]);
    }

    #[test]
    fn hash_is_order_independent() {
        let a = ScopeSet::parse(["evilcorp.com", "1.2.3.0/24"]).unwrap();
        let b = ScopeSet::parse(["1.2.3.4/24", "EVILCORP.com"]).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.hash(), b.hash());
    }

    #[test]
    fn serde_as_sorted_list() {
        let set = ScopeSet::parse(["www.evilcorp.ce", "evilcorp.com", "1.2.3.4/24"]).unwrap();
        let json = serde_json::to_string(&set).unwrap();
        assert_eq!(json, r#"["1.2.3.0/24","evilcorp.com","www.evilcorp.ce"]"#);
        let back: ScopeSet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, set);
        assert!(serde_json::from_str::<ScopeSet>(r#"["not a host"]"#).is_err());
    }
}
