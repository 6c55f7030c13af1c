//! Address identity and classification.
//!
//! Addresses are matched by their base value (no mask) and stored with a
//! mask. Classification decides whether an address may serve as a primary
//! candidate under the private-first rule.

use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Reachability class of an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressClass {
    Private,
    Public,
}

impl AddressClass {
    /// Classify an address, with or without a mask.
    ///
    /// Unparseable input is treated as public.
    #[must_use]
    pub fn of(address: &str) -> Self {
        if is_private(address) {
            AddressClass::Private
        } else {
            AddressClass::Public
        }
    }

    /// Description written on addresses of this class.
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            AddressClass::Private => "Private IP",
            AddressClass::Public => "Public IP (NAT)",
        }
    }
}

/// Strip the mask suffix, if any.
#[must_use]
pub fn base_address(address: &str) -> &str {
    address.split('/').next().unwrap_or_default().trim()
}

/// Two addresses are the same iff their base values are equal.
#[must_use]
pub fn same_address(left: &str, right: &str) -> bool {
    base_address(left) == base_address(right)
}

/// Render an address with a mask, defaulting to a host mask.
#[must_use]
pub fn with_cidr(address: &str) -> String {
    let address = address.trim();
    match address.parse::<IpNetwork>() {
        Ok(network) => format!("{}/{}", network.ip(), network.prefix()),
        Err(_) if address.contains('/') => address.to_string(),
        Err(_) => format!("{address}/32"),
    }
}

/// Check if an address belongs to a private, loopback, link-local or
/// otherwise non-routable range.
#[must_use]
pub fn is_private(address: &str) -> bool {
    match base_address(address).parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => is_private_v4(v4),
        Ok(IpAddr::V6(v6)) => is_private_v6(v6),
        Err(_) => false,
    }
}

fn is_private_v4(ip: Ipv4Addr) -> bool {
    let [a, b, c, _] = ip.octets();
    ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_documentation()
        || ip.is_broadcast()
        || a == 0
        // 192.0.0.0/24 protocol assignments
        || (a == 192 && b == 0 && c == 0)
        // 198.18.0.0/15 benchmarking
        || (a == 198 && (b & 0xfe) == 18)
        // 240.0.0.0/4 reserved
        || a >= 240
}

fn is_private_v6(ip: Ipv6Addr) -> bool {
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        // fc00::/7 unique local
        || (first & 0xfe00) == 0xfc00
        // fe80::/10 link local
        || (first & 0xffc0) == 0xfe80
        // 2001:db8::/32 documentation
        || (first == 0x2001 && ip.segments()[1] == 0x0db8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_private_ranges() {
        for address in [
            "10.0.0.1",
            "10.128.0.5/24",
            "172.16.0.1",
            "172.31.255.254",
            "192.168.1.10/32",
            "127.0.0.1",
            "169.254.3.4",
            "fd00::1",
            "fe80::1/64",
            "::1",
        ] {
            assert!(is_private(address), "{address} should be private");
        }
    }

    #[test]
    fn test_public_ranges() {
        for address in ["8.8.8.8", "84.201.130.10/32", "172.32.0.1", "100.64.0.1", "2a02:6b8::1"] {
            assert!(!is_private(address), "{address} should be public");
        }
    }

    #[test]
    fn test_unparseable_is_public() {
        assert!(!is_private("not-an-ip"));
        assert_eq!(AddressClass::of(""), AddressClass::Public);
    }

    #[test]
    fn test_base_address() {
        assert_eq!(base_address("10.0.0.1/24"), "10.0.0.1");
        assert_eq!(base_address("10.0.0.1"), "10.0.0.1");
        assert!(same_address("10.0.0.1/24", "10.0.0.1/32"));
        assert!(!same_address("10.0.0.1/32", "10.0.0.2/32"));
    }

    #[test]
    fn test_with_cidr() {
        assert_eq!(with_cidr("10.0.0.1"), "10.0.0.1/32");
        assert_eq!(with_cidr("10.0.0.1/24"), "10.0.0.1/24");
        assert_eq!(with_cidr("2001:db8::5"), "2001:db8::5/128");
    }

    #[test]
    fn test_descriptions() {
        assert_eq!(AddressClass::of("10.1.2.3").description(), "Private IP");
        assert_eq!(AddressClass::of("51.250.1.1").description(), "Public IP (NAT)");
    }
}
