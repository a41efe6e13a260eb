// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Frame header encode/decode latency at a few representative payload
//! sizes, and the RTCP control header alongside it.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use rtps_tcp::{RtcpControlHeader, RtcpKind, TcpFrameHeader};
use std::hint::black_box as bb;

fn bench_frame_header_roundtrip(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_header_roundtrip");

    for payload_len in [0usize, 64, 1024, 16384, 65000 - 14] {
        group.bench_with_input(
            BenchmarkId::from_parameter(payload_len),
            &payload_len,
            |b, &payload_len| {
                b.iter(|| {
                    let header = TcpFrameHeader::for_payload(payload_len, 7100);
                    let encoded = header.encode();
                    let decoded = TcpFrameHeader::decode(&bb(encoded)).unwrap();
                    bb(decoded)
                });
            },
        );
    }

    group.finish();
}

fn bench_rtcp_control_header_roundtrip(c: &mut Criterion) {
    c.bench_function("rtcp_control_header_roundtrip", |b| {
        let header = RtcpControlHeader {
            kind: RtcpKind::OpenLogicalPortRequest,
            flags: 0,
            transaction_id: 42,
            payload_length: 2,
        };
        b.iter(|| {
            let encoded = header.encode();
            let decoded = RtcpControlHeader::decode(&bb(encoded)).unwrap();
            bb(decoded)
        });
    });
}

criterion_group!(
    benches,
    bench_frame_header_roundtrip,
    bench_rtcp_control_header_roundtrip
);
criterion_main!(benches);
