// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! One TCP connection's state machine and I/O (spec.md §3, §4.2).

use std::collections::{HashMap, VecDeque};
use std::io::{self, Write};
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::byte_stream::ByteStream;
use crate::error::{TransportError, TransportResult};
use crate::frame::{encode_frame, encode_rtcp_frame, FrameReader, RtcpControlHeader};
use crate::locator::Locator;
use crate::receiver::MessageReceiverHandle;

/// Role a `Connection` plays: it was accepted (INPUT) or it connected out
/// (OUTPUT) (spec.md §3).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionRole {
    Input,
    Output,
}

/// Connection state machine (spec.md §3, §4.2).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
    WaitingForBind,
    WaitingForBindResponse,
    Established,
    Unbinding,
}

/// Mutable per-logical-port bookkeeping, owned by the receive loop except
/// during enqueue from `OpenOutputChannel` (spec.md §4.2 Concurrency).
struct PortState {
    /// Locally requested, not yet confirmed open (FIFO: head is the
    /// in-flight `OpenLogicalPortRequest`).
    pending_output: VecDeque<u16>,
    /// Remote-confirmed open for outbound sends.
    open_output: std::collections::BTreeSet<u16>,
    /// Locally accepting inbound frames.
    open_input: std::collections::BTreeSet<u16>,
}

impl PortState {
    fn new() -> Self {
        Self {
            pending_output: VecDeque::new(),
            open_output: Default::default(),
            open_input: Default::default(),
        }
    }
}

/// One TCP connection: socket, RTCP state, and per-logical-port receiver
/// map (spec.md §3).
pub struct Connection {
    /// Handle used only by `recv_frame`, on the connection's dedicated
    /// receive thread.
    reader: Mutex<Box<dyn ByteStream>>,
    /// Independent handle (via `ByteStream::try_clone`) used only by
    /// `send`/`send_rtcp`, so a blocking read never stalls a send (spec.md
    /// §4.2 Concurrency: "independent read and write mutexes").
    writer: Mutex<Box<dyn ByteStream>>,
    peer: Mutex<Locator>,
    role: ConnectionRole,
    state: Mutex<ConnectionState>,
    ports: Mutex<PortState>,
    receivers: Mutex<HashMap<u16, MessageReceiverHandle>>,
    frame_reader: Mutex<FrameReader>,
    alive: AtomicBool,
    auto_release: AtomicBool,
    next_transaction_id: std::sync::atomic::AtomicU32,
    /// The receiver sink supplied to `OpenOutputChannel` for the locator
    /// that originally created this connection (OUTPUT role only).
    /// `ResetAndReconnect` (spec.md §4.6) uses this to preserve the
    /// receiver's identity across a reconnect.
    initial_receiver: Mutex<Option<MessageReceiverHandle>>,
    /// The full (IP, physical, logical) locator originally passed to
    /// `OpenOutputChannel` alongside `initial_receiver`. `ResetAndReconnect`
    /// reopens exactly this locator on the fresh `Connector`.
    initial_locator: Mutex<Option<Locator>>,
    last_keep_alive_response: Mutex<Option<std::time::Instant>>,
}

impl Connection {
    /// `stream` becomes the read handle; a second, independently-owned
    /// handle obtained via `ByteStream::try_clone` becomes the write
    /// handle (spec.md §3: "a read mutex and a write mutex (independent,
    /// so sends may proceed while a receive blocks on the wire)").
    pub fn new(
        stream: Box<dyn ByteStream>,
        peer: Locator,
        role: ConnectionRole,
        initial_state: ConnectionState,
        max_message_size: u32,
    ) -> io::Result<Arc<Self>> {
        let writer = stream.try_clone()?;
        Ok(Arc::new(Self {
            reader: Mutex::new(stream),
            writer: Mutex::new(writer),
            peer: Mutex::new(peer),
            role,
            state: Mutex::new(initial_state),
            ports: Mutex::new(PortState::new()),
            receivers: Mutex::new(HashMap::new()),
            frame_reader: Mutex::new(FrameReader::new(max_message_size)),
            alive: AtomicBool::new(true),
            auto_release: AtomicBool::new(true),
            next_transaction_id: std::sync::atomic::AtomicU32::new(1),
            initial_receiver: Mutex::new(None),
            initial_locator: Mutex::new(None),
            last_keep_alive_response: Mutex::new(None),
        }))
    }

    pub fn set_initial_receiver(&self, receiver: MessageReceiverHandle) {
        *self.initial_receiver.lock() = Some(receiver);
    }

    pub fn initial_receiver(&self) -> Option<MessageReceiverHandle> {
        self.initial_receiver.lock().clone()
    }

    pub fn set_initial_locator(&self, locator: Locator) {
        *self.initial_locator.lock() = Some(locator);
    }

    pub fn initial_locator(&self) -> Option<Locator> {
        *self.initial_locator.lock()
    }

    pub fn role(&self) -> ConnectionRole {
        self.role
    }

    pub fn peer(&self) -> Locator {
        *self.peer.lock()
    }

    pub fn set_peer(&self, peer: Locator) {
        *self.peer.lock() = peer;
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    pub fn set_state(&self, state: ConnectionState) {
        *self.state.lock() = state;
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    pub fn set_auto_release(&self, auto_release: bool) {
        self.auto_release.store(auto_release, Ordering::Release);
    }

    pub fn auto_release(&self) -> bool {
        self.auto_release.load(Ordering::Acquire)
    }

    pub fn next_transaction_id(&self) -> u32 {
        self.next_transaction_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Record that a `KeepAliveResponse` was just received, so a watchdog
    /// can tell a live-but-quiet connection from a dead one (spec.md §4.2
    /// keep-alive).
    pub fn note_keep_alive_response(&self) {
        *self.last_keep_alive_response.lock() = Some(std::time::Instant::now());
    }

    pub fn last_keep_alive_response(&self) -> Option<std::time::Instant> {
        *self.last_keep_alive_response.lock()
    }

    // ------------------------------------------------------------------
    // Logical port bookkeeping (spec.md §3 invariants, §9 "friend" access)
    // ------------------------------------------------------------------

    /// Enqueue `logical_port` onto pending-output. Invariant: a logical
    /// port is in at most one of {pending-output, open-output}.
    pub fn enqueue_pending_output(&self, logical_port: u16) {
        let mut ports = self.ports.lock();
        if !ports.open_output.contains(&logical_port)
            && !ports.pending_output.contains(&logical_port)
        {
            ports.pending_output.push_back(logical_port);
        }
    }

    /// Is there a pending-output request in flight (queue non-empty)?
    pub fn has_pending_output(&self) -> bool {
        !self.ports.lock().pending_output.is_empty()
    }

    /// Peek the head of pending-output without removing it.
    pub fn pending_output_head(&self) -> Option<u16> {
        self.ports.lock().pending_output.front().copied()
    }

    /// Promote the head of pending-output to open-output (positive
    /// response), returning the promoted port if any.
    pub fn promote_pending_to_open(&self) -> Option<u16> {
        let mut ports = self.ports.lock();
        let port = ports.pending_output.pop_front()?;
        ports.open_output.insert(port);
        Some(port)
    }

    /// Drop the head of pending-output (final negative response).
    pub fn drop_pending_head(&self) -> Option<u16> {
        self.ports.lock().pending_output.pop_front()
    }

    pub fn open_output_ports(&self) -> Vec<u16> {
        self.ports.lock().open_output.iter().copied().collect()
    }

    pub fn is_open_output(&self, logical_port: u16) -> bool {
        self.ports.lock().open_output.contains(&logical_port)
    }

    pub fn add_open_input(&self, logical_port: u16) {
        self.ports.lock().open_input.insert(logical_port);
    }

    pub fn remove_open_output(&self, logical_port: u16) {
        self.ports.lock().open_output.remove(&logical_port);
    }

    pub fn open_input_ports(&self) -> Vec<u16> {
        self.ports.lock().open_input.iter().copied().collect()
    }

    pub fn is_open_input(&self, logical_port: u16) -> bool {
        self.ports.lock().open_input.contains(&logical_port)
    }

    /// Subset of `requested` that is locally open for input (spec.md §4.2
    /// `CheckLogicalPortsRequest`).
    pub fn check_open_input(&self, requested: &[u16]) -> Vec<u16> {
        let ports = self.ports.lock();
        requested
            .iter()
            .copied()
            .filter(|p| ports.open_input.contains(p))
            .collect()
    }

    // ------------------------------------------------------------------
    // Receiver registry
    // ------------------------------------------------------------------

    pub fn register_receiver(&self, logical_port: u16, receiver: MessageReceiverHandle) {
        self.receivers.lock().insert(logical_port, receiver);
    }

    pub fn receiver_for(&self, logical_port: u16) -> Option<MessageReceiverHandle> {
        self.receivers.lock().get(&logical_port).cloned()
    }

    // ------------------------------------------------------------------
    // I/O: send
    // ------------------------------------------------------------------

    /// Send an RTPS payload on `logical_port`, framed (spec.md §4.2
    /// `send`). Serialized by the write handle's mutex.
    pub fn send(&self, logical_port: u16, payload: &[u8]) -> TransportResult<()> {
        let frame = encode_frame(logical_port, payload);
        self.write_all_locked(&frame)
    }

    /// Send an RTCP control message (logical port 0).
    pub fn send_rtcp(&self, control: &RtcpControlHeader, payload: &[u8]) -> TransportResult<()> {
        let frame = encode_rtcp_frame(control, payload);
        self.write_all_locked(&frame)
    }

    fn write_all_locked(&self, frame: &[u8]) -> TransportResult<()> {
        let mut writer = self.writer.lock();
        match writer.write_all(frame) {
            Ok(()) => Ok(()),
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::UnexpectedEof
                        | std::io::ErrorKind::ConnectionReset
                        | std::io::ErrorKind::BrokenPipe
                ) =>
            {
                self.disable();
                Err(TransportError::PeerClosed {
                    addr: self.peer_socket_addr(),
                })
            }
            Err(e) => {
                self.disable();
                Err(TransportError::Transient(e.to_string()))
            }
        }
    }

    fn peer_socket_addr(&self) -> std::net::SocketAddr {
        let peer = self.peer();
        std::net::SocketAddr::new(std::net::IpAddr::V4(peer.address()), peer.physical_port())
    }

    // ------------------------------------------------------------------
    // I/O: receive
    // ------------------------------------------------------------------

    /// Read exactly one frame, blocking until data is available (spec.md
    /// §4.2 `receive-loop`). Returns `(logical_port, payload)`.
    ///
    /// Only the connection's dedicated receive thread calls this (spec.md
    /// §5): at most one in-flight read per connection. The read handle is
    /// a real blocking socket, so a short read simply blocks in the
    /// kernel rather than spinning; `WouldBlock` is only reachable here
    /// through the in-memory mock stream used in unit tests, where it
    /// means "no more data queued yet".
    pub fn recv_frame(&self) -> TransportResult<(u16, Vec<u8>)> {
        let mut stream = self.reader.lock();
        let mut reader = self.frame_reader.lock();
        loop {
            match reader.decode(&mut **stream) {
                Ok(Some((port, payload))) => return Ok((port, payload)),
                Ok(None) => {
                    std::thread::sleep(std::time::Duration::from_millis(1));
                    continue;
                }
                Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                    self.disable();
                    return Err(TransportError::BadFrame(e.to_string()));
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        std::io::ErrorKind::UnexpectedEof | std::io::ErrorKind::ConnectionReset
                    ) =>
                {
                    self.disable();
                    return Err(TransportError::PeerClosed {
                        addr: self.peer_socket_addr(),
                    });
                }
                Err(e) => {
                    self.disable();
                    return Err(TransportError::Transient(e.to_string()));
                }
            }
        }
    }

    /// Disable the connection: liveness false, socket closed. Idempotent.
    pub fn disable(&self) {
        if self.alive.swap(false, Ordering::AcqRel) {
            self.set_state(ConnectionState::Disconnected);
            let _ = self.writer.lock().shutdown(std::net::Shutdown::Both);
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("peer", &self.peer())
            .field("role", &self.role)
            .field("state", &self.state())
            .field("alive", &self.is_alive())
            .finish()
    }
}
