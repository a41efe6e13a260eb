// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transport configuration (spec.md §6).

use std::net::Ipv4Addr;
use std::time::Duration;

use crate::error::TransportError;

/// Minimum socket buffer size floor used when the OS default is probed and
/// found to be smaller than this (spec.md §6: "floor = minimum-socket-buffer
/// constant").
pub const MINIMUM_SOCKET_BUFFER: u32 = 65536;

/// Hard ceiling on `max_message_size` (spec.md §4.6/§6).
pub const MAX_MESSAGE_SIZE_CEILING: u32 = 65000;

/// Configuration for the TCP transport core.
#[derive(Clone, Debug)]
pub struct TcpTransportConfig {
    /// SO_SNDBUF; 0 = auto-detect from OS default.
    pub send_buffer_size: u32,

    /// SO_RCVBUF; 0 = auto-detect from OS default.
    pub receive_buffer_size: u32,

    /// Maximum RTPS/RTCP message size, header included. Must be
    /// `<= MAX_MESSAGE_SIZE_CEILING` and `<=` both buffer sizes.
    pub max_message_size: u32,

    /// IPv4 addresses allowed to participate; empty = accept all.
    /// `0.0.0.0` is always allowed regardless of this list.
    pub interface_whitelist: Vec<Ipv4Addr>,

    /// Opaque 12-byte participant GUID prefix, carried into RTPS dispatch.
    pub guid_prefix: [u8; 12],

    /// Keep-alive probe interval. `0` disables keep-alive (see
    /// DESIGN.md for the Open Question resolution).
    pub keep_alive_frequency_ms: u64,

    /// Keep-alive response timeout before disabling the connection.
    pub keep_alive_timeout_ms: u64,

    /// Delay before a failed `Connector` retries (spec.md §4.4: 100ms).
    pub connect_retry_delay: Duration,

    /// TCP_NODELAY on accepted/connected sockets.
    pub nodelay: bool,

    /// Listen backlog for acceptors.
    pub listen_backlog: u32,
}

impl Default for TcpTransportConfig {
    fn default() -> Self {
        Self {
            send_buffer_size: 0,
            receive_buffer_size: 0,
            max_message_size: MAX_MESSAGE_SIZE_CEILING,
            interface_whitelist: Vec::new(),
            guid_prefix: [0u8; 12],
            keep_alive_frequency_ms: 0,
            keep_alive_timeout_ms: 0,
            connect_retry_delay: Duration::from_millis(100),
            nodelay: true,
            listen_backlog: 128,
        }
    }
}

impl TcpTransportConfig {
    /// Builder: set max message size.
    pub fn with_max_message_size(mut self, size: u32) -> Self {
        self.max_message_size = size;
        self
    }

    /// Builder: set explicit socket buffer sizes.
    pub fn with_buffers(mut self, send: u32, recv: u32) -> Self {
        self.send_buffer_size = send;
        self.receive_buffer_size = recv;
        self
    }

    /// Builder: set the interface whitelist.
    pub fn with_interface_whitelist(mut self, whitelist: Vec<Ipv4Addr>) -> Self {
        self.interface_whitelist = whitelist;
        self
    }

    /// Builder: set the participant GUID prefix.
    pub fn with_guid_prefix(mut self, guid_prefix: [u8; 12]) -> Self {
        self.guid_prefix = guid_prefix;
        self
    }

    /// Check whether `addr` passes the interface whitelist.
    pub fn allows_interface(&self, addr: Ipv4Addr) -> bool {
        addr.is_unspecified() || self.interface_whitelist.is_empty() || self.interface_whitelist.contains(&addr)
    }

    /// Validate per spec.md §4.6: `max_message_size <= 65000` and
    /// `max_message_size <=` both buffer sizes (when those are non-zero,
    /// i.e. already resolved from auto-detect).
    pub fn validate(&self) -> Result<(), TransportError> {
        if self.max_message_size == 0 {
            return Err(TransportError::Config(
                "max_message_size must be > 0".into(),
            ));
        }
        if self.max_message_size > MAX_MESSAGE_SIZE_CEILING {
            return Err(TransportError::Config(format!(
                "max_message_size {} exceeds ceiling {}",
                self.max_message_size, MAX_MESSAGE_SIZE_CEILING
            )));
        }
        if self.send_buffer_size != 0 && self.max_message_size > self.send_buffer_size {
            return Err(TransportError::Config(format!(
                "max_message_size {} exceeds send_buffer_size {}",
                self.max_message_size, self.send_buffer_size
            )));
        }
        if self.receive_buffer_size != 0 && self.max_message_size > self.receive_buffer_size {
            return Err(TransportError::Config(format!(
                "max_message_size {} exceeds receive_buffer_size {}",
                self.max_message_size, self.receive_buffer_size
            )));
        }
        Ok(())
    }

    /// Clamp a probed OS-default buffer size to the configured floor.
    pub fn clamp_buffer(probed: u32) -> u32 {
        probed.max(MINIMUM_SOCKET_BUFFER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(TcpTransportConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_oversized_message() {
        let cfg = TcpTransportConfig::default().with_max_message_size(70_000);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_message_larger_than_buffers() {
        let cfg = TcpTransportConfig::default()
            .with_buffers(1024, 1024)
            .with_max_message_size(2048);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn whitelist_allows_unspecified_and_listed() {
        let cfg = TcpTransportConfig::default()
            .with_interface_whitelist(vec![Ipv4Addr::new(10, 0, 0, 5)]);
        assert!(cfg.allows_interface(Ipv4Addr::UNSPECIFIED));
        assert!(cfg.allows_interface(Ipv4Addr::new(10, 0, 0, 5)));
        assert!(!cfg.allows_interface(Ipv4Addr::new(10, 0, 0, 6)));
    }

    #[test]
    fn empty_whitelist_allows_all() {
        let cfg = TcpTransportConfig::default();
        assert!(cfg.allows_interface(Ipv4Addr::new(8, 8, 8, 8)));
    }

    #[test]
    fn clamp_buffer_applies_floor() {
        assert_eq!(TcpTransportConfig::clamp_buffer(1024), MINIMUM_SOCKET_BUFFER);
        assert_eq!(
            TcpTransportConfig::clamp_buffer(200_000),
            200_000
        );
    }
}
