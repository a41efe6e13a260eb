// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RTCP control-message manager (spec.md §4.5, §6).
//!
//! A pure function over a `Connection` and a decoded RTCP control
//! message: it mutates the connection's state/port bookkeeping through
//! the module-private interface `Connection` exposes (spec.md §9,
//! "'Friend' access to Connection internals") and issues replies via
//! `Connection::send_rtcp`. It never touches the transport registries —
//! that stays `Transport`'s job.

use std::sync::Arc;

use crate::connection::{Connection, ConnectionRole, ConnectionState};
use crate::error::{TransportError, TransportResult};
use crate::frame::{ResponseCode, RtcpControlHeader, RtcpKind, RTCP_HEADER_SIZE};

/// Opaque participant identifier carried in bind messages (spec.md §6
/// `rtps-participant-guid-prefix`).
pub type GuidPrefix = [u8; 12];

fn protocol_error(kind: RtcpKind, state: ConnectionState) -> TransportError {
    TransportError::Protocol(format!("unexpected {kind:?} while in state {state:?}"))
}

fn next_header(conn: &Connection, kind: RtcpKind, payload_len: usize) -> RtcpControlHeader {
    RtcpControlHeader {
        kind,
        flags: 0,
        transaction_id: conn.next_transaction_id(),
        payload_length: payload_len as u32,
    }
}

/// Send `BindConnectionRequest` after a successful outbound TCP connect
/// (state machine row: `Disconnected --TCP connect OK (OUTPUT)--> Connected`).
pub fn send_bind_request(conn: &Arc<Connection>, local_guid: GuidPrefix) -> TransportResult<()> {
    let header = next_header(conn, RtcpKind::BindConnectionRequest, local_guid.len());
    conn.send_rtcp(&header, &local_guid)
}

/// Reply `BindConnectionResponse(OK)` (state machine row:
/// `WaitingForBind --BindConnectionRequest--> Established`).
fn send_bind_response(
    conn: &Arc<Connection>,
    code: ResponseCode,
    local_guid: GuidPrefix,
) -> TransportResult<()> {
    let mut body = Vec::with_capacity(1 + local_guid.len());
    body.push(code as u8);
    body.extend_from_slice(&local_guid);
    let header = next_header(conn, RtcpKind::BindConnectionResponse, body.len());
    conn.send_rtcp(&header, &body)
}

/// Send `OpenLogicalPortRequest(port)` — the head of pending-output.
pub fn send_open_logical_port_request(conn: &Arc<Connection>, port: u16) -> TransportResult<()> {
    let body = port.to_le_bytes();
    let header = next_header(conn, RtcpKind::OpenLogicalPortRequest, body.len());
    conn.send_rtcp(&header, &body)
}

fn send_open_logical_port_response(
    conn: &Arc<Connection>,
    code: ResponseCode,
) -> TransportResult<()> {
    let body = [code as u8];
    let header = next_header(conn, RtcpKind::OpenLogicalPortResponse, body.len());
    conn.send_rtcp(&header, &body)
}

fn send_check_logical_port_response(conn: &Arc<Connection>, ports: &[u16]) -> TransportResult<()> {
    let mut body = Vec::with_capacity(2 + ports.len() * 2);
    body.extend_from_slice(&(ports.len() as u16).to_le_bytes());
    for p in ports {
        body.extend_from_slice(&p.to_le_bytes());
    }
    let header = next_header(conn, RtcpKind::CheckLogicalPortResponse, body.len());
    conn.send_rtcp(&header, &body)
}

fn send_keep_alive_response(conn: &Arc<Connection>, code: ResponseCode) -> TransportResult<()> {
    let body = [code as u8];
    let header = next_header(conn, RtcpKind::KeepAliveResponse, body.len());
    conn.send_rtcp(&header, &body)
}

fn decode_ports(body: &[u8]) -> Vec<u16> {
    if body.len() < 2 {
        return Vec::new();
    }
    let count = u16::from_le_bytes([body[0], body[1]]) as usize;
    body[2..]
        .chunks_exact(2)
        .take(count)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect()
}

/// After the head of pending-output is resolved (promoted or dropped),
/// kick off the next request if the queue is non-empty (spec.md §4.2
/// `Established --OpenLogicalPortResponse-->`).
fn maybe_send_next_open_port_request(conn: &Arc<Connection>) -> TransportResult<()> {
    if let Some(next) = conn.pending_output_head() {
        send_open_logical_port_request(conn, next)?;
    }
    Ok(())
}

/// Decode and act on one RTCP control frame payload (the bytes following
/// the 14-byte TCP frame header, for a frame with `logical_port == 0`).
/// Unlisted transitions are `ProtocolError`; the caller is expected to
/// disable the connection when this returns `Err`.
pub fn handle_control_frame(
    conn: &Arc<Connection>,
    frame_payload: &[u8],
    local_guid: GuidPrefix,
) -> TransportResult<()> {
    let header = RtcpControlHeader::decode(frame_payload)
        .ok_or_else(|| TransportError::BadFrame("short RTCP control header".into()))?;
    let body = &frame_payload[RTCP_HEADER_SIZE..];
    let state = conn.state();

    match header.kind {
        RtcpKind::BindConnectionRequest => {
            if state != ConnectionState::WaitingForBind {
                return Err(protocol_error(header.kind, state));
            }
            conn.set_state(ConnectionState::Established);
            send_bind_response(conn, ResponseCode::Ok, local_guid)
        }

        RtcpKind::BindConnectionResponse => {
            if state != ConnectionState::WaitingForBindResponse {
                return Err(protocol_error(header.kind, state));
            }
            let code = body.first().copied().and_then(ResponseCode::from_u8);
            match code {
                Some(ResponseCode::Ok) | Some(ResponseCode::ExistingConnection) => {
                    conn.set_state(ConnectionState::Established);
                    maybe_send_next_open_port_request(conn)
                }
                _ => Err(TransportError::Protocol(format!(
                    "bind rejected: {code:?}"
                ))),
            }
        }

        RtcpKind::OpenLogicalPortRequest => {
            if state != ConnectionState::Established {
                return Err(protocol_error(header.kind, state));
            }
            if body.len() < 2 {
                return Err(TransportError::BadFrame("short OpenLogicalPortRequest".into()));
            }
            let port = u16::from_le_bytes([body[0], body[1]]);
            conn.add_open_input(port);
            send_open_logical_port_response(conn, ResponseCode::Ok)
        }

        RtcpKind::OpenLogicalPortResponse => {
            if state != ConnectionState::Established {
                return Err(protocol_error(header.kind, state));
            }
            let code = body.first().copied().and_then(ResponseCode::from_u8);
            match code {
                Some(ResponseCode::Ok) => {
                    conn.promote_pending_to_open();
                }
                _ => {
                    // BAD_PORT or any other negative response: drop the
                    // pending head. Retry policy is left unspecified
                    // (spec.md §9 Open Questions) — we don't retry.
                    conn.drop_pending_head();
                }
            }
            maybe_send_next_open_port_request(conn)
        }

        RtcpKind::CheckLogicalPortRequest => {
            if state != ConnectionState::Established {
                return Err(protocol_error(header.kind, state));
            }
            let requested = decode_ports(body);
            let open = conn.check_open_input(&requested);
            send_check_logical_port_response(conn, &open)
        }

        RtcpKind::CheckLogicalPortResponse => {
            if state != ConnectionState::Established {
                return Err(protocol_error(header.kind, state));
            }
            // The response itself carries no state transition here; a
            // future port-probing feature would consume `decode_ports`.
            Ok(())
        }

        RtcpKind::KeepAliveRequest => {
            if state != ConnectionState::Established {
                return Err(protocol_error(header.kind, state));
            }
            send_keep_alive_response(conn, ResponseCode::Ok)
        }

        RtcpKind::KeepAliveResponse => {
            if state != ConnectionState::Established {
                return Err(protocol_error(header.kind, state));
            }
            conn.note_keep_alive_response();
            Ok(())
        }

        RtcpKind::LogicalPortIsClosedRequest => {
            if state != ConnectionState::Established {
                return Err(protocol_error(header.kind, state));
            }
            if body.len() < 2 {
                return Err(TransportError::BadFrame(
                    "short LogicalPortIsClosedRequest".into(),
                ));
            }
            let port = u16::from_le_bytes([body[0], body[1]]);
            conn.remove_open_output(port);
            Ok(())
        }

        RtcpKind::UnbindConnectionRequest => {
            conn.set_state(ConnectionState::Unbinding);
            conn.disable();
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::byte_stream::mock::MockStream;
    use crate::locator::Locator;
    use std::net::Ipv4Addr;

    fn established_connection(role: ConnectionRole) -> Arc<Connection> {
        let stream = MockStream::new();
        let peer = Locator::new(Ipv4Addr::new(127, 0, 0, 1), 5100, 7100);
        Connection::new(Box::new(stream), peer, role, ConnectionState::Established, 65000).unwrap()
    }

    #[test]
    fn bind_request_on_waiting_for_bind_establishes_and_replies() {
        let stream = MockStream::new();
        let mirror = stream.clone();
        let peer = Locator::new(Ipv4Addr::new(127, 0, 0, 1), 5100, 7100);
        let conn = Connection::new(
            Box::new(stream),
            peer,
            ConnectionRole::Input,
            ConnectionState::WaitingForBind,
            65000,
        )
        .unwrap();

        let request_header = RtcpControlHeader {
            kind: RtcpKind::BindConnectionRequest,
            flags: 0,
            transaction_id: 1,
            payload_length: 12,
        };
        let mut payload = request_header.encode().to_vec();
        payload.extend_from_slice(&[0u8; 12]);

        handle_control_frame(&conn, &payload, [9u8; 12]).unwrap();
        assert_eq!(conn.state(), ConnectionState::Established);
        assert!(!mirror.get_written_data().is_empty());
    }

    #[test]
    fn open_logical_port_response_ok_promotes_head() {
        let conn = established_connection(ConnectionRole::Output);
        conn.enqueue_pending_output(7100);
        conn.enqueue_pending_output(7101);

        let header = RtcpControlHeader {
            kind: RtcpKind::OpenLogicalPortResponse,
            flags: 0,
            transaction_id: 1,
            payload_length: 1,
        };
        let mut payload = header.encode().to_vec();
        payload.push(ResponseCode::Ok as u8);

        handle_control_frame(&conn, &payload, [0u8; 12]).unwrap();
        assert!(conn.is_open_output(7100));
        assert_eq!(conn.pending_output_head(), Some(7101));
    }

    #[test]
    fn open_logical_port_response_bad_port_drops_head() {
        let conn = established_connection(ConnectionRole::Output);
        conn.enqueue_pending_output(7100);

        let header = RtcpControlHeader {
            kind: RtcpKind::OpenLogicalPortResponse,
            flags: 0,
            transaction_id: 1,
            payload_length: 1,
        };
        let mut payload = header.encode().to_vec();
        payload.push(ResponseCode::BadPort as u8);

        handle_control_frame(&conn, &payload, [0u8; 12]).unwrap();
        assert!(!conn.is_open_output(7100));
        assert!(!conn.has_pending_output());
    }

    #[test]
    fn unbind_request_disables_connection() {
        let conn = established_connection(ConnectionRole::Input);
        let header = RtcpControlHeader {
            kind: RtcpKind::UnbindConnectionRequest,
            flags: 0,
            transaction_id: 1,
            payload_length: 0,
        };
        let payload = header.encode().to_vec();
        handle_control_frame(&conn, &payload, [0u8; 12]).unwrap();
        assert!(!conn.is_alive());
    }

    #[test]
    fn rejects_unexpected_transition() {
        let conn = established_connection(ConnectionRole::Output);
        // BindConnectionRequest while already Established is not in the
        // transition table.
        let header = RtcpControlHeader {
            kind: RtcpKind::BindConnectionRequest,
            flags: 0,
            transaction_id: 1,
            payload_length: 0,
        };
        let payload = header.encode().to_vec();
        let err = handle_control_frame(&conn, &payload, [0u8; 12]).unwrap_err();
        assert!(matches!(err, TransportError::Protocol(_)));
    }

    #[test]
    fn check_logical_port_request_replies_with_subset() {
        let conn = established_connection(ConnectionRole::Input);
        conn.add_open_input(7100);
        conn.add_open_input(7101);

        let mut body = Vec::new();
        body.extend_from_slice(&3u16.to_le_bytes());
        for p in [7100u16, 7102, 7101] {
            body.extend_from_slice(&p.to_le_bytes());
        }
        let header = RtcpControlHeader {
            kind: RtcpKind::CheckLogicalPortRequest,
            flags: 0,
            transaction_id: 1,
            payload_length: body.len() as u32,
        };
        let mut payload = header.encode().to_vec();
        payload.extend_from_slice(&body);

        handle_control_frame(&conn, &payload, [0u8; 12]).unwrap();
    }
}
