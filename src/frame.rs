// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Wire framing for RTPS-over-TCP (spec.md §3, §6).
//!
//! Every RTPS payload or RTCP control body is preceded by a fixed 14-byte
//! header. When `logical_port == 0` the body is an RTCP control message
//! (its own small header, §6); otherwise the body is an opaque RTPS
//! message destined for the receiver registered on that logical port.

use std::io::{self, Read};

/// Size of the TCP frame header, in bytes.
pub const FRAME_HEADER_SIZE: usize = 14;

/// Size of the RTCP control header that follows a frame header with
/// `logical_port == 0`.
pub const RTCP_HEADER_SIZE: usize = 10;

/// Fixed 14-byte header prefixing every frame on the wire.
///
/// Wire layout (little-endian):
/// - bytes 0..4:  total length, including this header
/// - bytes 4..6:  logical port (0 = RTCP control)
/// - bytes 6..10: CRC32 (written as 0, never validated on receive)
/// - bytes 10..14: reserved/flags (written as 0)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TcpFrameHeader {
    pub total_length: u32,
    pub logical_port: u16,
    pub crc: u32,
    pub flags: u32,
}

impl TcpFrameHeader {
    /// Build a header for a payload of `payload_len` bytes on `logical_port`.
    pub fn for_payload(payload_len: usize, logical_port: u16) -> Self {
        Self {
            total_length: (FRAME_HEADER_SIZE + payload_len) as u32,
            logical_port,
            crc: 0,
            flags: 0,
        }
    }

    pub fn encode(&self) -> [u8; FRAME_HEADER_SIZE] {
        let mut buf = [0u8; FRAME_HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.total_length.to_le_bytes());
        buf[4..6].copy_from_slice(&self.logical_port.to_le_bytes());
        buf[6..10].copy_from_slice(&self.crc.to_le_bytes());
        buf[10..14].copy_from_slice(&self.flags.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < FRAME_HEADER_SIZE {
            return None;
        }
        Some(Self {
            total_length: u32::from_le_bytes(buf[0..4].try_into().unwrap()),
            logical_port: u16::from_le_bytes(buf[4..6].try_into().unwrap()),
            crc: u32::from_le_bytes(buf[6..10].try_into().unwrap()),
            flags: u32::from_le_bytes(buf[10..14].try_into().unwrap()),
        })
    }

    /// Validate the header's length against `max_message_size`
    /// (spec.md §4.1: `BadFrame` when length < header size or > max size).
    pub fn validate(&self, max_message_size: u32) -> Result<(), String> {
        if (self.total_length as usize) < FRAME_HEADER_SIZE {
            return Err(format!(
                "frame length {} shorter than header size {}",
                self.total_length, FRAME_HEADER_SIZE
            ));
        }
        if self.total_length > max_message_size {
            return Err(format!(
                "frame length {} exceeds max_message_size {}",
                self.total_length, max_message_size
            ));
        }
        Ok(())
    }

    pub fn payload_len(&self) -> usize {
        self.total_length as usize - FRAME_HEADER_SIZE
    }
}

/// RTCP control message kind (spec.md §6).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum RtcpKind {
    BindConnectionRequest = 1,
    BindConnectionResponse = 2,
    OpenLogicalPortRequest = 3,
    OpenLogicalPortResponse = 4,
    CheckLogicalPortRequest = 5,
    CheckLogicalPortResponse = 6,
    KeepAliveRequest = 7,
    KeepAliveResponse = 8,
    LogicalPortIsClosedRequest = 9,
    UnbindConnectionRequest = 10,
}

impl RtcpKind {
    pub fn from_u8(v: u8) -> Option<Self> {
        use RtcpKind::*;
        Some(match v {
            1 => BindConnectionRequest,
            2 => BindConnectionResponse,
            3 => OpenLogicalPortRequest,
            4 => OpenLogicalPortResponse,
            5 => CheckLogicalPortRequest,
            6 => CheckLogicalPortResponse,
            7 => KeepAliveRequest,
            8 => KeepAliveResponse,
            9 => LogicalPortIsClosedRequest,
            10 => UnbindConnectionRequest,
            _ => return None,
        })
    }
}

/// RTCP response code (spec.md §6).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ResponseCode {
    Ok = 0,
    ExistingConnection = 1,
    BadRequest = 2,
    UnknownLocator = 3,
    ServerError = 4,
    BadPort = 5,
}

impl ResponseCode {
    pub fn from_u8(v: u8) -> Option<Self> {
        use ResponseCode::*;
        Some(match v {
            0 => Ok,
            1 => ExistingConnection,
            2 => BadRequest,
            3 => UnknownLocator,
            4 => ServerError,
            5 => BadPort,
            _ => return None,
        })
    }
}

/// RTCP control header (follows the frame header when `logical_port == 0`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RtcpControlHeader {
    pub kind: RtcpKind,
    pub flags: u8,
    pub transaction_id: u32,
    pub payload_length: u32,
}

impl RtcpControlHeader {
    pub fn encode(&self) -> [u8; RTCP_HEADER_SIZE] {
        let mut buf = [0u8; RTCP_HEADER_SIZE];
        buf[0] = self.kind as u8;
        buf[1] = self.flags;
        buf[2..6].copy_from_slice(&self.transaction_id.to_le_bytes());
        buf[6..10].copy_from_slice(&self.payload_length.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < RTCP_HEADER_SIZE {
            return None;
        }
        Some(Self {
            kind: RtcpKind::from_u8(buf[0])?,
            flags: buf[1],
            transaction_id: u32::from_le_bytes(buf[2..6].try_into().unwrap()),
            payload_length: u32::from_le_bytes(buf[6..10].try_into().unwrap()),
        })
    }
}

/// Incremental, non-blocking frame reader. Mirrors the teacher's
/// length-prefix `FrameCodec` but keyed on the 14-byte RTCP-aware header
/// instead of a bare 4-byte length.
#[derive(Debug)]
pub struct FrameReader {
    state: ReadState,
    header_buf: [u8; FRAME_HEADER_SIZE],
    body_buf: Vec<u8>,
    max_size: u32,
}

#[derive(Debug, Clone, Copy)]
enum ReadState {
    Header { read: usize },
    Body { header: HeaderBits, read: usize },
}

#[derive(Debug, Clone, Copy)]
struct HeaderBits {
    total_length: u32,
    logical_port: u16,
}

impl FrameReader {
    pub fn new(max_size: u32) -> Self {
        Self {
            state: ReadState::Header { read: 0 },
            header_buf: [0u8; FRAME_HEADER_SIZE],
            body_buf: Vec::new(),
            max_size,
        }
    }

    pub fn reset(&mut self) {
        self.state = ReadState::Header { read: 0 };
    }

    /// Try to decode one complete frame from `reader`.
    ///
    /// Returns `Ok(Some((logical_port, payload)))` on a complete frame,
    /// `Ok(None)` on `WouldBlock`, `Err` on EOF/oversize/I-O error.
    pub fn decode<R: Read + ?Sized>(
        &mut self,
        reader: &mut R,
    ) -> io::Result<Option<(u16, Vec<u8>)>> {
        loop {
            match self.state {
                ReadState::Header { read } => {
                    match reader.read(&mut self.header_buf[read..FRAME_HEADER_SIZE]) {
                        Ok(0) => {
                            return Err(io::Error::new(
                                io::ErrorKind::UnexpectedEof,
                                "connection closed",
                            ));
                        }
                        Ok(n) => {
                            let total = read + n;
                            if total < FRAME_HEADER_SIZE {
                                self.state = ReadState::Header { read: total };
                                continue;
                            }
                            let header = TcpFrameHeader::decode(&self.header_buf).unwrap();
                            if let Err(detail) = header.validate(self.max_size) {
                                self.state = ReadState::Header { read: 0 };
                                return Err(io::Error::new(io::ErrorKind::InvalidData, detail));
                            }
                            let payload_len = header.payload_len();
                            if payload_len == 0 {
                                self.state = ReadState::Header { read: 0 };
                                return Ok(Some((header.logical_port, Vec::new())));
                            }
                            self.body_buf.clear();
                            self.body_buf.resize(payload_len, 0);
                            self.state = ReadState::Body {
                                header: HeaderBits {
                                    total_length: header.total_length,
                                    logical_port: header.logical_port,
                                },
                                read: 0,
                            };
                        }
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                            self.state = ReadState::Header { read };
                            return Ok(None);
                        }
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(e) => return Err(e),
                    }
                }
                ReadState::Body { header, read } => {
                    let expected = header.total_length as usize - FRAME_HEADER_SIZE;
                    match reader.read(&mut self.body_buf[read..expected]) {
                        Ok(0) => {
                            return Err(io::Error::new(
                                io::ErrorKind::UnexpectedEof,
                                "incomplete frame body",
                            ));
                        }
                        Ok(n) => {
                            let total = read + n;
                            if total < expected {
                                self.state = ReadState::Body { header, read: total };
                                continue;
                            }
                            let payload = std::mem::take(&mut self.body_buf);
                            self.state = ReadState::Header { read: 0 };
                            return Ok(Some((header.logical_port, payload)));
                        }
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                            self.state = ReadState::Body { header, read };
                            return Ok(None);
                        }
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(e) => return Err(e),
                    }
                }
            }
        }
    }
}

/// Encode a logical-port frame (header + payload) into one buffer, ready
/// for a single `write`.
pub fn encode_frame(logical_port: u16, payload: &[u8]) -> Vec<u8> {
    let header = TcpFrameHeader::for_payload(payload.len(), logical_port);
    let mut buf = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
    buf.extend_from_slice(&header.encode());
    buf.extend_from_slice(payload);
    buf
}

/// Encode an RTCP control frame (logical port 0): frame header, RTCP
/// header, RTCP payload.
pub fn encode_rtcp_frame(control: &RtcpControlHeader, payload: &[u8]) -> Vec<u8> {
    let body_len = RTCP_HEADER_SIZE + payload.len();
    let header = TcpFrameHeader::for_payload(body_len, LOGICAL_PORT_RTCP);
    let mut buf = Vec::with_capacity(FRAME_HEADER_SIZE + body_len);
    buf.extend_from_slice(&header.encode());
    buf.extend_from_slice(&control.encode());
    buf.extend_from_slice(payload);
    buf
}

use crate::locator::LOGICAL_PORT_RTCP;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn header_roundtrip_all_lengths_and_ports() {
        for len in [14u32, 100, 65000] {
            for port in [0u16, 1, 7100, 65535] {
                let h = TcpFrameHeader {
                    total_length: len,
                    logical_port: port,
                    crc: 0,
                    flags: 0,
                };
                let encoded = h.encode();
                let decoded = TcpFrameHeader::decode(&encoded).unwrap();
                assert_eq!(h, decoded);
            }
        }
    }

    #[test]
    fn validate_rejects_short_and_oversized() {
        let short = TcpFrameHeader {
            total_length: 10,
            logical_port: 0,
            crc: 0,
            flags: 0,
        };
        assert!(short.validate(65000).is_err());

        let big = TcpFrameHeader {
            total_length: 70_000,
            logical_port: 0,
            crc: 0,
            flags: 0,
        };
        assert!(big.validate(65000).is_err());
    }

    #[test]
    fn frame_reader_decodes_payload() {
        let frame = encode_frame(7100, b"hello");
        let mut cursor = Cursor::new(frame);
        let mut reader = FrameReader::new(65000);
        let (port, payload) = reader.decode(&mut cursor).unwrap().unwrap();
        assert_eq!(port, 7100);
        assert_eq!(payload, b"hello");
    }

    #[test]
    fn frame_reader_rejects_oversize() {
        let frame = encode_frame(7100, &vec![0u8; 2048]);
        let mut cursor = Cursor::new(frame);
        let mut reader = FrameReader::new(1024);
        let err = reader.decode(&mut cursor).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn frame_reader_decodes_rtcp_control() {
        let control = RtcpControlHeader {
            kind: RtcpKind::BindConnectionRequest,
            flags: 0,
            transaction_id: 42,
            payload_length: 0,
        };
        let frame = encode_rtcp_frame(&control, &[]);
        let mut cursor = Cursor::new(frame);
        let mut reader = FrameReader::new(65000);
        let (port, payload) = reader.decode(&mut cursor).unwrap().unwrap();
        assert_eq!(port, LOGICAL_PORT_RTCP);
        let decoded = RtcpControlHeader::decode(&payload).unwrap();
        assert_eq!(decoded, control);
    }

    #[test]
    fn rtcp_kind_roundtrip() {
        for v in 1u8..=10 {
            let kind = RtcpKind::from_u8(v).unwrap();
            assert_eq!(kind as u8, v);
        }
        assert!(RtcpKind::from_u8(0).is_none());
        assert!(RtcpKind::from_u8(11).is_none());
    }
}
