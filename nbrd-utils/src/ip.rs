//
// Copyright (c) The nbrd authors
//
// SPDX-License-Identifier: MIT
//

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use ipnetwork::{IpNetwork, Ipv4Network, Ipv6Network};
use serde::{Deserialize, Serialize};

// IP address family.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum AddressFamily {
    Ipv4,
    Ipv6,
}

// Extension methods for IpAddr.
pub trait IpAddrExt {
    // Return whether the address can identify a live peer on a link.
    fn is_usable(&self) -> bool;

    // Return the address family of the address.
    fn address_family(&self) -> AddressFamily;

    // Return the unspecified address of the given address family.
    fn unspecified(af: AddressFamily) -> IpAddr;
}

// Extension methods for Ipv4Addr.
pub trait Ipv4AddrExt {
    const LENGTH: usize;

    fn is_usable(&self) -> bool;
}

// Extension methods for Ipv6Addr.
pub trait Ipv6AddrExt {
    const LENGTH: usize;

    fn is_usable(&self) -> bool;

    // Return whether this is an IPv4-mapped IPv6 address (::ffff:a.b.c.d).
    fn is_ipv4_mapped(&self) -> bool;
}

// Extension methods for Ipv4Network.
pub trait Ipv4NetworkExt {
    const MAX_PREFIXLEN: u8;

    // Zero out the host bits of the prefix.
    fn apply_mask(&self) -> Ipv4Network;

    // Return whether the prefix may appear in a routing table.
    fn is_routable(&self) -> bool;
}

// Extension methods for Ipv6Network.
pub trait Ipv6NetworkExt {
    const MAX_PREFIXLEN: u8;

    fn apply_mask(&self) -> Ipv6Network;

    fn is_routable(&self) -> bool;
}

// ===== impl AddressFamily =====

impl std::fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AddressFamily::Ipv4 => write!(f, "ipv4"),
            AddressFamily::Ipv6 => write!(f, "ipv6"),
        }
    }
}

// ===== impl IpAddr =====

impl IpAddrExt for IpAddr {
    fn is_usable(&self) -> bool {
        match self {
            IpAddr::V4(addr) => addr.is_usable(),
            IpAddr::V6(addr) => addr.is_usable(),
        }
    }

    fn address_family(&self) -> AddressFamily {
        match self {
            IpAddr::V4(_) => AddressFamily::Ipv4,
            IpAddr::V6(_) => AddressFamily::Ipv6,
        }
    }

    fn unspecified(af: AddressFamily) -> IpAddr {
        match af {
            AddressFamily::Ipv4 => Ipv4Addr::UNSPECIFIED.into(),
            AddressFamily::Ipv6 => Ipv6Addr::UNSPECIFIED.into(),
        }
    }
}

// ===== impl Ipv4Addr =====

impl Ipv4AddrExt for Ipv4Addr {
    const LENGTH: usize = 4;

    fn is_usable(&self) -> bool {
        !self.is_unspecified()
            && !self.is_loopback()
            && !self.is_multicast()
            && !self.is_broadcast()
    }
}

// ===== impl Ipv6Addr =====

impl Ipv6AddrExt for Ipv6Addr {
    const LENGTH: usize = 16;

    fn is_usable(&self) -> bool {
        !self.is_unspecified()
            && !self.is_loopback()
            && !self.is_multicast()
            && !self.is_ipv4_mapped()
    }

    fn is_ipv4_mapped(&self) -> bool {
        matches!(self.octets(), [0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0xff, 0xff, ..])
    }
}

// ===== impl Ipv4Network =====

impl Ipv4NetworkExt for Ipv4Network {
    const MAX_PREFIXLEN: u8 = 32;

    fn apply_mask(&self) -> Ipv4Network {
        let prefix = self.ip() & self.mask();
        Ipv4Network::new(prefix, self.prefix()).unwrap()
    }

    fn is_routable(&self) -> bool {
        let addr = self.ip();
        !addr.is_loopback() && !addr.is_multicast() && !addr.is_broadcast()
    }
}

// ===== impl Ipv6Network =====

impl Ipv6NetworkExt for Ipv6Network {
    const MAX_PREFIXLEN: u8 = 128;

    fn apply_mask(&self) -> Ipv6Network {
        let prefix = self.ip() & self.mask();
        Ipv6Network::new(prefix, self.prefix()).unwrap()
    }

    fn is_routable(&self) -> bool {
        let addr = self.ip();
        !addr.is_loopback() && !addr.is_multicast() && !addr.is_ipv4_mapped()
    }
}

// ===== global functions =====

// Zero out the host bits of the given prefix.
pub fn apply_mask(prefix: &IpNetwork) -> IpNetwork {
    match prefix {
        IpNetwork::V4(prefix) => IpNetwork::V4(prefix.apply_mask()),
        IpNetwork::V6(prefix) => IpNetwork::V6(prefix.apply_mask()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipv4_mapped_detection() {
        let mapped: Ipv6Addr = "::ffff:192.0.2.1".parse().unwrap();
        assert!(mapped.is_ipv4_mapped());
        assert!(!mapped.is_usable());

        let global: Ipv6Addr = "2001:db8::1".parse().unwrap();
        assert!(!global.is_ipv4_mapped());
        assert!(global.is_usable());
    }

    #[test]
    fn prefix_mask() {
        let prefix: Ipv4Network = "10.1.2.3/24".parse().unwrap();
        assert_eq!(prefix.apply_mask().to_string(), "10.1.2.0/24");
    }
}
