//! Remote address normalization
//!
//! When an answer points at an address that belongs to this host, packets
//! from the remote engine arrive with a loopback source address. The address
//! handed to the local transport must match that, so local addresses are
//! rewritten to the canonical loopback address.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Addresses currently assigned to this host's interfaces
pub fn local_interface_addresses() -> Vec<IpAddr> {
    match if_addrs::get_if_addrs() {
        Ok(interfaces) => interfaces.iter().map(|iface| iface.ip()).collect(),
        Err(e) => {
            tracing::warn!("Failed to enumerate local interfaces: {}", e);
            Vec::new()
        }
    }
}

/// Rewrite `address` to loopback if it is one of `local_addresses`, a
/// loopback address or the unspecified address
pub fn normalize_with(address: IpAddr, local_addresses: &[IpAddr]) -> IpAddr {
    let is_local = address.is_loopback() || address.is_unspecified() || local_addresses.contains(&address);
    if !is_local {
        return address;
    }

    let canonical = match address {
        IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::LOCALHOST),
    };
    if canonical != address {
        tracing::debug!("Normalized local address {} to {}", address, canonical);
    }
    canonical
}

/// Normalize against this host's interface addresses
pub fn normalize_remote_address(address: IpAddr) -> IpAddr {
    if address.is_loopback() || address.is_unspecified() {
        return normalize_with(address, &[]);
    }
    normalize_with(address, &local_interface_addresses())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interface_address_becomes_loopback() {
        let lan: IpAddr = "192.168.1.20".parse().unwrap();
        assert_eq!(normalize_with(lan, &[lan]), IpAddr::V4(Ipv4Addr::LOCALHOST));
    }

    #[test]
    fn test_foreign_address_is_untouched() {
        let remote: IpAddr = "203.0.113.7".parse().unwrap();
        let lan: IpAddr = "192.168.1.20".parse().unwrap();
        assert_eq!(normalize_with(remote, &[lan]), remote);
    }

    #[test]
    fn test_loopback_variants_collapse() {
        let other_loopback: IpAddr = "127.0.1.1".parse().unwrap();
        assert_eq!(normalize_with(other_loopback, &[]), IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(
            normalize_with("0.0.0.0".parse().unwrap(), &[]),
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        );
        assert_eq!(
            normalize_with("::".parse().unwrap(), &[]),
            IpAddr::V6(Ipv6Addr::LOCALHOST)
        );
    }

    #[test]
    fn test_this_host_loopback_is_stable() {
        assert_eq!(
            normalize_remote_address(IpAddr::V4(Ipv4Addr::LOCALHOST)),
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        );
    }
}
