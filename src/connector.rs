// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Attempts an outbound connect to one (IP, physical port) target, retrying
//! on failure until cancelled (spec.md §4.4).
//!
//! Each attempt parks a dedicated thread on a condvar until the shared
//! executor reports the connecting socket writable (the standard
//! non-blocking-connect completion signal), mirroring the
//! async-read-plus-semaphore bridge `Connection::recv_frame` uses for the
//! receive path (spec.md §9 "Blocking receive plus async read").

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

use mio::net::TcpStream;
use parking_lot::{Condvar, Mutex};

use crate::io_executor::{ConnectorSink, IoExecutor};
use crate::locator::Locator;
use crate::transport::Transport;

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(200);

struct ConnectWaiter {
    ready: Arc<(Mutex<bool>, Condvar)>,
}

impl ConnectorSink for ConnectWaiter {
    fn on_writable(&self) {
        let (lock, cvar) = &*self.ready;
        *lock.lock() = true;
        cvar.notify_all();
    }
}

/// A pending outbound connection attempt (spec.md §3 `pending-outputs`).
/// Runs its connect-and-retry loop on a dedicated thread; on success it
/// hands the connected socket to the `Transport` and the thread exits.
pub struct Connector {
    target: Locator,
    cancelled: Arc<AtomicBool>,
}

impl Connector {
    pub fn start(
        target: Locator,
        executor: Arc<IoExecutor>,
        transport: Weak<Transport>,
        retry_delay: Duration,
    ) -> Arc<Self> {
        let cancelled = Arc::new(AtomicBool::new(false));
        let connector = Arc::new(Self {
            target,
            cancelled: cancelled.clone(),
        });

        let thread_cancelled = cancelled.clone();
        let spawned = thread::Builder::new()
            .name(format!(
                "rtps-tcp-connect-{}:{}",
                target.address(),
                target.physical_port()
            ))
            .spawn(move || Self::run(target, executor, transport, thread_cancelled, retry_delay));

        if let Err(e) = spawned {
            // No thread means no connect attempt will ever happen; mark
            // this attempt cancelled so it behaves like a failed connect
            // rather than panicking across the `Transport` API boundary
            // (spec.md §7: public operations never throw).
            log::warn!("failed to spawn connector thread for {target}: {e}");
            cancelled.store(true, Ordering::Release);
        }

        connector
    }

    pub fn target(&self) -> Locator {
        self.target
    }

    /// Cancel this attempt. The running thread notices on its next wake
    /// and exits without promoting the socket (spec.md §4.4
    /// `CloseOutputChannel` cancellation).
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    fn run(
        target: Locator,
        executor: Arc<IoExecutor>,
        transport: Weak<Transport>,
        cancelled: Arc<AtomicBool>,
        retry_delay: Duration,
    ) {
        while !cancelled.load(Ordering::Acquire) {
            match Self::try_connect_once(target, &executor, &cancelled) {
                Ok(Some(stream)) => {
                    if let Some(t) = transport.upgrade() {
                        t.handle_connected(target, stream);
                    }
                    return;
                }
                Ok(None) => return,
                Err(e) => {
                    log::info!("connect to {target} failed: {e}");
                    if cancelled.load(Ordering::Acquire) {
                        return;
                    }
                    thread::sleep(retry_delay);
                }
            }
        }
    }

    /// One connect attempt. Returns `Ok(Some(stream))` on success,
    /// `Ok(None)` if cancelled while waiting, `Err` on connect failure.
    fn try_connect_once(
        target: Locator,
        executor: &IoExecutor,
        cancelled: &AtomicBool,
    ) -> io::Result<Option<TcpStream>> {
        let addr = SocketAddr::new(IpAddr::V4(target.address()), target.physical_port());
        let mut stream = TcpStream::connect(addr)?;

        let ready = Arc::new((Mutex::new(false), Condvar::new()));
        let sink: Arc<dyn ConnectorSink> = Arc::new(ConnectWaiter {
            ready: ready.clone(),
        });
        let token = executor.register_connecting(&mut stream, sink)?;

        let (lock, cvar) = &*ready;
        let mut guard = lock.lock();
        loop {
            if *guard {
                break;
            }
            if cancelled.load(Ordering::Acquire) {
                executor.deregister_connecting(token, &mut stream);
                return Ok(None);
            }
            cvar.wait_for(&mut guard, WAIT_POLL_INTERVAL);
        }
        drop(guard);

        executor.deregister_connecting(token, &mut stream);

        match stream.take_error()? {
            Some(e) => Err(e),
            None => Ok(Some(stream)),
        }
    }
}
