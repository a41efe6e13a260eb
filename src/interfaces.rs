// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Host-interface enumeration, exposed as a pluggable service (spec.md §1).
//!
//! The transport core never calls `local_ip_address` (or any OS API)
//! directly; it goes through [`InterfaceLister`], so the same `Transport`
//! can be driven by a mock list in tests and by a real interface scan in
//! production, mirroring how the teacher's discovery code treats
//! interface scanning as a replaceable boundary.

use std::net::Ipv4Addr;

/// Enumerates the local machine's IPv4 interfaces.
pub trait InterfaceLister: Send + Sync {
    /// Returns every non-loopback IPv4 address bound to a local interface.
    fn local_ipv4_addresses(&self) -> Vec<Ipv4Addr>;
}

/// Default lister backed by `local-ip-address`.
#[derive(Default)]
pub struct SystemInterfaceLister;

impl InterfaceLister for SystemInterfaceLister {
    fn local_ipv4_addresses(&self) -> Vec<Ipv4Addr> {
        match local_ip_address::list_afinet_netifas() {
            Ok(ifaces) => ifaces
                .into_iter()
                .filter_map(|(_name, addr)| match addr {
                    std::net::IpAddr::V4(v4) if !v4.is_loopback() => Some(v4),
                    _ => None,
                })
                .collect(),
            Err(e) => {
                log::warn!("failed to enumerate local IPv4 interfaces: {e}");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
pub mod test_support {
    use super::*;

    /// Fixed-list lister for deterministic tests (spec.md §8 scenarios 5-6).
    pub struct FixedInterfaceLister(pub Vec<Ipv4Addr>);

    impl InterfaceLister for FixedInterfaceLister {
        fn local_ipv4_addresses(&self) -> Vec<Ipv4Addr> {
            self.0.clone()
        }
    }
}
