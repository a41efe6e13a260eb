// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error kinds for the TCP transport (see spec.md §7).
//!
//! Errors on a single `Connection` never propagate past that connection:
//! `Transport`'s public API collapses them to a `bool` and logs the detail.

use std::fmt;
use std::net::SocketAddr;

/// Errors produced by the transport core.
#[derive(Debug)]
pub enum TransportError {
    /// Invalid configuration at `Transport::init`. Fatal.
    Config(String),

    /// An acceptor's listening socket could not be bound.
    Bind { addr: SocketAddr, detail: String },

    /// An outbound connect attempt failed. Triggers `Connector` retry.
    Connect { addr: SocketAddr, detail: String },

    /// EOF or connection-reset observed during read or write.
    PeerClosed { addr: SocketAddr },

    /// Frame length out of range, or a short/invalid frame.
    BadFrame(String),

    /// An RTCP message arrived in a state that does not expect it.
    Protocol(String),

    /// Any other I/O error not covered above.
    Transient(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Config(d) => write!(f, "config error: {d}"),
            TransportError::Bind { addr, detail } => write!(f, "bind failed on {addr}: {detail}"),
            TransportError::Connect { addr, detail } => {
                write!(f, "connect to {addr} failed: {detail}")
            }
            TransportError::PeerClosed { addr } => write!(f, "peer {addr} closed the connection"),
            TransportError::BadFrame(d) => write!(f, "bad frame: {d}"),
            TransportError::Protocol(d) => write!(f, "protocol error: {d}"),
            TransportError::Transient(d) => write!(f, "transient I/O error: {d}"),
        }
    }
}

impl std::error::Error for TransportError {}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        use std::io::ErrorKind::*;
        match e.kind() {
            UnexpectedEof | ConnectionReset | BrokenPipe => {
                // Caller supplies the peer address where it is known; here we
                // only have the raw I/O error so fall back to Transient.
                TransportError::Transient(e.to_string())
            }
            _ => TransportError::Transient(e.to_string()),
        }
    }
}

pub type TransportResult<T> = Result<T, TransportError>;
