// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Listens on one local physical port and hands accepted sockets to the
//! owning `Transport` (spec.md §4.3).

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Weak};

use mio::net::TcpListener;
use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};

use crate::io_executor::{AcceptorSink, IoExecutor};
use crate::transport::Transport;

/// Owns a listening socket bound to a local physical port. One `Acceptor`
/// per physical port that has at least one open input channel (spec.md §3
/// `pending-inputs`).
pub struct Acceptor {
    physical_port: u16,
    listener: Mutex<TcpListener>,
    token: Mutex<Option<mio::Token>>,
    executor: Arc<IoExecutor>,
    transport: Weak<Transport>,
}

impl Acceptor {
    /// Bind a listening socket on `address:physical_port` and register it
    /// with the shared executor. `address` is normally `0.0.0.0` (accept
    /// from any interface); the spec does not restrict acceptors to a
    /// single interface.
    pub fn bind(
        address: Ipv4Addr,
        physical_port: u16,
        backlog: u32,
        executor: Arc<IoExecutor>,
        transport: Weak<Transport>,
    ) -> io::Result<Arc<Self>> {
        let addr = SocketAddr::new(IpAddr::V4(address), physical_port);
        let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.set_nonblocking(true)?;
        socket.bind(&addr.into())?;
        socket.listen(backlog as i32)?;
        let std_listener: std::net::TcpListener = socket.into();
        let listener = TcpListener::from_std(std_listener);

        let acceptor = Arc::new(Self {
            physical_port,
            listener: Mutex::new(listener),
            token: Mutex::new(None),
            executor: executor.clone(),
            transport,
        });

        let sink: Arc<dyn AcceptorSink> = acceptor.clone();
        let token = executor.register_listener(&mut acceptor.listener.lock(), sink)?;
        *acceptor.token.lock() = Some(token);

        Ok(acceptor)
    }

    pub fn physical_port(&self) -> u16 {
        self.physical_port
    }
}

impl AcceptorSink for Acceptor {
    /// Drain every pending connection on the listening socket. Errors
    /// other than `WouldBlock` are logged; the acceptor keeps accepting
    /// (spec.md §4.3).
    fn on_acceptable(&self) {
        loop {
            let accepted = self.listener.lock().accept();
            match accepted {
                Ok((stream, peer_addr)) => {
                    if let Some(transport) = self.transport.upgrade() {
                        transport.handle_accepted(self.physical_port, stream, peer_addr);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    log::warn!(
                        "acceptor on physical port {}: accept error: {e}",
                        self.physical_port
                    );
                    break;
                }
            }
        }
    }
}

impl Drop for Acceptor {
    fn drop(&mut self) {
        if let Some(token) = self.token.lock().take() {
            self.executor
                .deregister_listener(token, &mut self.listener.lock());
        }
    }
}
