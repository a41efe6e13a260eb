// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Byte-stream abstraction over a TCP socket, so connection and frame logic
//! can be tested against an in-memory stream instead of a real socket.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};

/// A byte-oriented duplex stream. Implemented for [`TcpStream`] and, in
/// tests, for an in-memory [`mock::MockStream`].
///
/// `Sync` is required even though every method takes `&mut self` or is a
/// query: `Connection` keeps one handle for reading and a second,
/// independently-owned handle (obtained via [`ByteStream::try_clone`]) for
/// writing, each behind its own `Mutex`, so a blocking receive on one
/// handle never stalls a concurrent send on the other (spec.md §4.2
/// Concurrency).
pub trait ByteStream: Read + Write + Send + Sync {
    fn shutdown(&self, how: Shutdown) -> io::Result<()>;
    fn local_addr(&self) -> io::Result<SocketAddr>;
    fn peer_addr(&self) -> io::Result<SocketAddr>;
    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()>;
    fn set_nodelay(&self, nodelay: bool) -> io::Result<()>;
    fn take_error(&self) -> io::Result<Option<io::Error>>;

    /// A second handle to the same underlying socket. For a real TCP
    /// socket this duplicates the OS descriptor (two handles, one
    /// connection) exactly as `TcpStream::try_clone` does, which is what
    /// lets one thread read while another writes without sharing a `&mut`.
    fn try_clone(&self) -> io::Result<Box<dyn ByteStream>>;
}

impl ByteStream for TcpStream {
    fn shutdown(&self, how: Shutdown) -> io::Result<()> {
        TcpStream::shutdown(self, how)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        TcpStream::local_addr(self)
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        TcpStream::peer_addr(self)
    }

    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        TcpStream::set_nonblocking(self, nonblocking)
    }

    fn set_nodelay(&self, nodelay: bool) -> io::Result<()> {
        TcpStream::set_nodelay(self, nodelay)
    }

    fn take_error(&self) -> io::Result<Option<io::Error>> {
        TcpStream::take_error(self)
    }

    fn try_clone(&self) -> io::Result<Box<dyn ByteStream>> {
        TcpStream::try_clone(self).map(|s| Box::new(s) as Box<dyn ByteStream>)
    }
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// In-memory stream for unit tests; mirrors a real non-blocking TCP
    /// socket closely enough to drive the `Connection` state machine and
    /// `FrameReader` without a real listener/connect pair. `clone()` (via
    /// `Clone` or `ByteStream::try_clone`) shares the same underlying
    /// buffers, mirroring how `TcpStream::try_clone` hands back a second
    /// handle to the same socket.
    #[derive(Debug)]
    pub struct MockStream {
        read_data: Arc<Mutex<VecDeque<u8>>>,
        write_data: Arc<Mutex<Vec<u8>>>,
        connected: Arc<Mutex<bool>>,
        local_addr: SocketAddr,
        peer_addr: SocketAddr,
    }

    impl MockStream {
        pub fn new() -> Self {
            Self {
                read_data: Arc::new(Mutex::new(VecDeque::new())),
                write_data: Arc::new(Mutex::new(Vec::new())),
                connected: Arc::new(Mutex::new(true)),
                local_addr: "127.0.0.1:1".parse().unwrap(),
                peer_addr: "127.0.0.1:2".parse().unwrap(),
            }
        }

        pub fn feed_read_data(&self, data: &[u8]) {
            self.read_data.lock().unwrap().extend(data);
        }

        pub fn get_written_data(&self) -> Vec<u8> {
            self.write_data.lock().unwrap().clone()
        }

        pub fn disconnect(&self) {
            *self.connected.lock().unwrap() = false;
        }
    }

    impl Clone for MockStream {
        fn clone(&self) -> Self {
            Self {
                read_data: self.read_data.clone(),
                write_data: self.write_data.clone(),
                connected: self.connected.clone(),
                local_addr: self.local_addr,
                peer_addr: self.peer_addr,
            }
        }
    }

    impl Read for MockStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if !*self.connected.lock().unwrap() {
                return Ok(0);
            }
            let mut data = self.read_data.lock().unwrap();
            if data.is_empty() {
                return Err(io::Error::new(io::ErrorKind::WouldBlock, "would block"));
            }
            let n = buf.len().min(data.len());
            for (i, b) in data.drain(..n).enumerate() {
                buf[i] = b;
            }
            Ok(n)
        }
    }

    impl Write for MockStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if !*self.connected.lock().unwrap() {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "not connected"));
            }
            self.write_data.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl ByteStream for MockStream {
        fn shutdown(&self, _how: Shutdown) -> io::Result<()> {
            *self.connected.lock().unwrap() = false;
            Ok(())
        }

        fn local_addr(&self) -> io::Result<SocketAddr> {
            Ok(self.local_addr)
        }

        fn peer_addr(&self) -> io::Result<SocketAddr> {
            Ok(self.peer_addr)
        }

        fn set_nonblocking(&self, _nonblocking: bool) -> io::Result<()> {
            Ok(())
        }

        fn set_nodelay(&self, _nodelay: bool) -> io::Result<()> {
            Ok(())
        }

        fn take_error(&self) -> io::Result<Option<io::Error>> {
            Ok(None)
        }

        fn try_clone(&self) -> io::Result<Box<dyn ByteStream>> {
            Ok(Box::new(self.clone()))
        }
    }
}
