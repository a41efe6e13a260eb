// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RTPS locator for the TCP transport.
//!
//! A [`Locator`] identifies a wire endpoint: kind, IPv4 address, physical
//! (TCP) port, and logical (RTCP multiplex) port. Equality is componentwise;
//! [`Locator::same_channel`] ignores the logical port so a `Connection` can
//! be matched purely by (address, physical port).

use std::fmt;
use std::net::Ipv4Addr;

/// Locator kind: TCP over IPv4. The only kind this transport supports.
pub const LOCATOR_KIND_TCPV4: i32 = 4;

/// Reserved logical port meaning "RTCP control traffic".
pub const LOGICAL_PORT_RTCP: u16 = 0;

/// Wire endpoint: (kind, IPv4 address, physical port, logical port).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Locator {
    kind: i32,
    address: [u8; 4],
    physical_port: u16,
    logical_port: u16,
}

impl Locator {
    /// Build a TCPv4 locator.
    pub fn new(address: Ipv4Addr, physical_port: u16, logical_port: u16) -> Self {
        Self {
            kind: LOCATOR_KIND_TCPV4,
            address: address.octets(),
            physical_port,
            logical_port,
        }
    }

    /// The "any" address (0.0.0.0), used to request normalization over all
    /// local interfaces.
    pub fn any(physical_port: u16, logical_port: u16) -> Self {
        Self::new(Ipv4Addr::UNSPECIFIED, physical_port, logical_port)
    }

    pub fn kind(&self) -> i32 {
        self.kind
    }

    pub fn address(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.address)
    }

    pub fn physical_port(&self) -> u16 {
        self.physical_port
    }

    pub fn logical_port(&self) -> u16 {
        self.logical_port
    }

    pub fn is_any(&self) -> bool {
        self.address() == Ipv4Addr::UNSPECIFIED
    }

    pub fn is_loopback(&self) -> bool {
        self.address().is_loopback()
    }

    /// Returns a copy of this locator with the given logical port.
    pub fn with_logical_port(&self, logical_port: u16) -> Self {
        Self {
            logical_port,
            ..*self
        }
    }

    /// Returns a copy with the address replaced (used by normalization and
    /// shrink-to-loopback).
    pub fn with_address(&self, address: Ipv4Addr) -> Self {
        Self {
            address: address.octets(),
            ..*self
        }
    }

    /// Componentwise equality but ignoring the logical port: matches a
    /// `Connection` by (IP, physical port) only.
    pub fn same_channel(&self, other: &Locator) -> bool {
        self.kind == other.kind
            && self.address == other.address
            && self.physical_port == other.physical_port
    }

    /// A copy of this locator with the address zeroed out, used as the
    /// result of "remote-to-main-local" translation: the physical/logical
    /// ports are meaningful, the address is not.
    ///
    /// The original Fast-RTPS `RemoteToMainLocal` returned `false` from a
    /// `Locator`-returning function, which cannot be right; this is the
    /// specified fix (see spec.md Open Questions).
    pub fn remote_to_main_local(&self) -> Self {
        self.with_address(Ipv4Addr::UNSPECIFIED)
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "tcpv4://{}:{}/{}",
            self.address(),
            self.physical_port,
            self.logical_port
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_channel_ignores_logical_port() {
        let a = Locator::new(Ipv4Addr::new(10, 0, 0, 1), 5100, 7100);
        let b = Locator::new(Ipv4Addr::new(10, 0, 0, 1), 5100, 7200);
        let c = Locator::new(Ipv4Addr::new(10, 0, 0, 2), 5100, 7100);
        assert!(a.same_channel(&b));
        assert!(!a.same_channel(&c));
        assert_ne!(a, b);
    }

    #[test]
    fn any_locator_detection() {
        let l = Locator::any(5100, 7100);
        assert!(l.is_any());
        let l2 = Locator::new(Ipv4Addr::new(127, 0, 0, 1), 5100, 7100);
        assert!(!l2.is_any());
        assert!(l2.is_loopback());
    }

    #[test]
    fn remote_to_main_local_zeroes_address() {
        let l = Locator::new(Ipv4Addr::new(192, 168, 1, 10), 5100, 7100);
        let fixed = l.remote_to_main_local();
        assert!(fixed.is_any());
        assert_eq!(fixed.physical_port(), 5100);
        assert_eq!(fixed.logical_port(), 7100);
    }

    #[test]
    fn display_format() {
        let l = Locator::new(Ipv4Addr::new(127, 0, 0, 1), 5100, 7100);
        assert_eq!(l.to_string(), "tcpv4://127.0.0.1:5100/7100");
    }
}
