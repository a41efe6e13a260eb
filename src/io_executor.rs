// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The single shared I/O executor thread (spec.md §5): one `mio::Poll`
//! loop drives async accept and connect completions for every `Acceptor`
//! and `Connector` in the `Transport`. Per-`Connection` receive loops run
//! on their own dedicated thread and do their reads directly (see
//! `transport.rs`'s `spawn_receive_thread`); the executor here only
//! multiplexes listen/connect readiness, mirroring the teacher's
//! `transport/tcp/io_thread.rs` `mio::Poll` + `Waker` set-up generalized
//! to many registered sources instead of one listener and one pending set.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Registry, Token, Waker};
use parking_lot::Mutex;

const WAKER_TOKEN: Token = Token(0);
const POLL_TIMEOUT: Duration = Duration::from_millis(200);
const MAX_EVENTS: usize = 256;

/// Called back on the executor thread when a registered listener has a
/// pending connection to accept.
pub trait AcceptorSink: Send + Sync {
    fn on_acceptable(&self);
}

/// Called back on the executor thread when a registered connecting
/// socket becomes writable (the usual non-blocking-connect completion
/// signal).
pub trait ConnectorSink: Send + Sync {
    fn on_writable(&self);
}

enum Sink {
    Listener(Arc<dyn AcceptorSink>),
    Connecting(Arc<dyn ConnectorSink>),
}

/// The shared reactor. One instance per `Transport`; `Acceptor`s and
/// `Connector`s register/deregister their sockets with it directly (mio's
/// `Registry` is `Send + Sync` and may be used from any thread), so the
/// executor thread itself only runs the poll loop and dispatches
/// readiness to the registered sink.
pub struct IoExecutor {
    registry: Registry,
    waker: Arc<Waker>,
    sinks: Mutex<HashMap<Token, Sink>>,
    next_token: AtomicUsize,
    running: Arc<AtomicBool>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl IoExecutor {
    pub fn start() -> io::Result<Arc<Self>> {
        let poll = Poll::new()?;
        let registry = poll.registry().try_clone()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN)?);
        let running = Arc::new(AtomicBool::new(true));

        let exec = Arc::new(Self {
            registry,
            waker,
            sinks: Mutex::new(HashMap::new()),
            next_token: AtomicUsize::new(1),
            running,
            thread: Mutex::new(None),
        });

        let runner = exec.clone();
        let handle = thread::Builder::new()
            .name("rtps-tcp-io".to_string())
            .spawn(move || runner.run(poll))?;
        *exec.thread.lock() = Some(handle);
        Ok(exec)
    }

    fn run(self: Arc<Self>, mut poll: Poll) {
        let mut events = Events::with_capacity(MAX_EVENTS);
        while self.running.load(Ordering::Acquire) {
            match poll.poll(&mut events, Some(POLL_TIMEOUT)) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    log::warn!("rtps-tcp-io: poll error: {e}");
                    continue;
                }
            }
            for event in events.iter() {
                if event.token() == WAKER_TOKEN {
                    continue;
                }
                let sink = self.sinks.lock().get(&event.token()).map(|s| match s {
                    Sink::Listener(l) => Sink::Listener(l.clone()),
                    Sink::Connecting(c) => Sink::Connecting(c.clone()),
                });
                match sink {
                    Some(Sink::Listener(s)) => s.on_acceptable(),
                    Some(Sink::Connecting(s)) => s.on_writable(),
                    None => {}
                }
            }
        }
        log::debug!("rtps-tcp-io: executor thread exiting");
    }

    fn alloc_token(&self) -> Token {
        Token(self.next_token.fetch_add(1, Ordering::Relaxed))
    }

    pub fn register_listener(
        &self,
        listener: &mut TcpListener,
        sink: Arc<dyn AcceptorSink>,
    ) -> io::Result<Token> {
        let token = self.alloc_token();
        self.registry.register(listener, token, Interest::READABLE)?;
        self.sinks.lock().insert(token, Sink::Listener(sink));
        Ok(token)
    }

    pub fn register_connecting(
        &self,
        stream: &mut TcpStream,
        sink: Arc<dyn ConnectorSink>,
    ) -> io::Result<Token> {
        let token = self.alloc_token();
        self.registry.register(stream, token, Interest::WRITABLE)?;
        self.sinks.lock().insert(token, Sink::Connecting(sink));
        Ok(token)
    }

    pub fn deregister_listener(&self, token: Token, listener: &mut TcpListener) {
        let _ = self.registry.deregister(listener);
        self.sinks.lock().remove(&token);
    }

    pub fn deregister_connecting(&self, token: Token, stream: &mut TcpStream) {
        let _ = self.registry.deregister(stream);
        self.sinks.lock().remove(&token);
    }

    /// Stop the executor thread and join it. Idempotent.
    pub fn shutdown(&self) {
        if self.running.swap(false, Ordering::AcqRel) {
            let _ = self.waker.wake();
            if let Some(handle) = self.thread.lock().take() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for IoExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}
