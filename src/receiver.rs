// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The message-receiver sink: the opaque, application-layer consumer of
//! decoded RTPS payloads (spec.md §1, §3, Glossary). The "message receiver"
//! above this transport is treated as an external collaborator — only its
//! contract is specified here.

use std::net::Ipv4Addr;
use std::sync::Arc;

/// Consumes RTPS payloads demultiplexed by logical port on one connection.
///
/// Implementations are expected to be cheap to clone (they're reference
/// counted via [`MessageReceiverHandle`]) and thread-safe, since the
/// receive loop calls `on_message` from the connection's dedicated
/// receive thread.
pub trait MessageReceiver: Send + Sync {
    /// Called once per demultiplexed RTPS payload.
    fn on_message(&self, source: Ipv4Addr, logical_port: u16, payload: &[u8]);
}

/// Reference-counted handle to a [`MessageReceiver`].
///
/// Spec.md §9: "Receiver sinks are reference-counted and shared between
/// Connection and application; 'weak' ownership is not required because
/// the receive loop retains a strong reference only for the duration of
/// one dispatch."
pub type MessageReceiverHandle = Arc<dyn MessageReceiver>;

#[cfg(test)]
pub mod test_support {
    use super::*;
    use std::sync::Mutex;

    /// Test receiver that records every delivered payload.
    #[derive(Default)]
    pub struct RecordingReceiver {
        pub received: Mutex<Vec<(Ipv4Addr, u16, Vec<u8>)>>,
    }

    impl MessageReceiver for RecordingReceiver {
        fn on_message(&self, source: Ipv4Addr, logical_port: u16, payload: &[u8]) {
            self.received
                .lock()
                .unwrap()
                .push((source, logical_port, payload.to_vec()));
        }
    }
}
