use std::net::IpAddr;

use ipnetwork::IpNetwork;

/// Rebuilds `net` from its network address, so `1.2.3.4/24` becomes `1.2.3.0/24`.
pub fn normalize(net: IpNetwork) -> IpNetwork {
    IpNetwork::new(net.network(), net.prefix()).unwrap_or(net)
}

pub fn max_prefix(net: &IpNetwork) -> u8 {
    match net {
        IpNetwork::V4(_) => 32,
        IpNetwork::V6(_) => 128,
    }
}

pub fn is_single_address(net: &IpNetwork) -> bool {
    net.prefix() == max_prefix(net)
}

/// True when every address of `inner` is also part of `outer`.
pub fn covers(outer: &IpNetwork, inner: &IpNetwork) -> bool {
    outer.is_ipv4() == inner.is_ipv4()
        && outer.prefix() <= inner.prefix()
        && outer.contains(inner.network())
}

pub fn contains_ip(net: &IpNetwork, ip: IpAddr) -> bool {
    net.contains(ip)
}

/// Single addresses print without a prefix.
pub fn network_to_string(net: &IpNetwork) -> String {
    if is_single_address(net) {
        net.network().to_string()
    } else {
        format!("{}/{}", net.network(), net.prefix())
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
    use std::net::Ipv4Addr;
    use std::str::FromStr;

    fn net(s: &str) -> IpNetwork {
        IpNetwork::from_str(s).unwrap()
    }

    #[test]
    fn normalize_basic_24() {
        assert_eq!(network_to_string(&normalize(net("192.168.1.42/24"))), "192.168.1.0/24");
    }

    #[test]
    fn normalize_prefix_0() {
        assert_eq!(network_to_string(&normalize(net("10.20.30.40/0"))), "0.0.0.0/0");
    }

    #[test]
    fn single_host_prints_without_prefix() {
        let single = net("203.0.113.7/32");
        assert!(is_single_address(&single));
        assert_eq!(network_to_string(&single), "203.0.113.7");
    }

    #[test]
    fn covers_nested_networks() {
        assert!(covers(&net("1.2.3.0/24"), &net("1.2.3.16/28")));
        assert!(covers(&net("1.2.3.0/24"), &net("1.2.3.0/24")));
        assert!(!covers(&net("1.2.3.16/28"), &net("1.2.3.0/24")));
        assert!(!covers(&net("1.2.3.0/24"), &net("1.2.4.0/28")));
        assert!(!covers(&net("0.0.0.0/0"), &net("::1/128")));
    }

    #[test]
    fn contains_ip_in_block() {
        let block = net("172.16.0.0/20");
        assert!(contains_ip(&block, IpAddr::V4(Ipv4Addr::new(172, 16, 15, 255))));
        assert!(!contains_ip(&block, IpAddr::V4(Ipv4Addr::new(172, 16, 16, 0))));
    }
}
