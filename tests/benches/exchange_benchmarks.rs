//! # OCPP Exchange Benchmarks
//!
//! Per-frame costs on the hot path:
//!
//! | Stage | What is measured |
//! |-------|------------------|
//! | Codec | decode and encode of a relayed, signed request |
//! | Signing | Ed25519 and HMAC sign + verify through the middleware |
//! | Routing | reply-hop resolution on paths of growing length |

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ocpp_crypto::{Ed25519KeyPair, KeyRing, SharedSecret};
use ocpp_exchange::{
    ActionFilter, ConnectionId, Direction, Router, RuleMode, SignatureMiddleware, SignaturePolicy,
    Topology,
};
use ocpp_types::{decode, encode, CorrelationId, Frame, NetworkPath, NodeId, RequestFrame, SourceRouting};
use serde_json::json;
use std::sync::Arc;

fn node(id: &str) -> NodeId {
    NodeId::new(id).expect("valid node id")
}

fn request() -> Frame {
    let request = RequestFrame::new(
        CorrelationId::new(),
        "CancelReservation",
        json!({ "reservationId": 4711 }),
        node("CSMS"),
    )
    .with_destination(SourceRouting::via(vec![node("LC1")], node("CP1")));
    Frame::Request(request.forwarded_by(node("LC1")))
}

fn middleware(keys: KeyRing, key_id: &str) -> SignatureMiddleware {
    let policy = SignaturePolicy::disabled()
        .with_rule(
            Direction::OutgoingRequest,
            ActionFilter::Any,
            RuleMode::Sign(key_id.to_string()),
        )
        .with_rule(Direction::IncomingRequest, ActionFilter::Any, RuleMode::Require);
    SignatureMiddleware::new(Arc::new(keys), Arc::new(policy))
}

// ============================================================================
// Codec
// ============================================================================

fn bench_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec");
    let frame = request();
    let raw = encode(&frame);

    group.throughput(Throughput::Bytes(raw.len() as u64));
    group.bench_function("decode_request", |b| {
        b.iter(|| black_box(decode(black_box(&raw)).is_ok()))
    });
    group.bench_function("encode_request", |b| b.iter(|| black_box(encode(&frame))));
    group.finish();
}

// ============================================================================
// Signing
// ============================================================================

fn bench_signing(c: &mut Criterion) {
    let mut group = c.benchmark_group("signing");

    let mut ed_keys = KeyRing::new();
    ed_keys.add_ed25519("ed", Ed25519KeyPair::from_seed([9; 32]));
    let mut mac_keys = KeyRing::new();
    mac_keys.add_hmac(
        "mac",
        SharedSecret::new(vec![0x5a; 32]).expect("32 byte secret"),
    );

    for (name, middleware) in [
        ("ed25519", middleware(ed_keys, "ed")),
        ("hmac_sha256", middleware(mac_keys, "mac")),
    ] {
        group.bench_function(BenchmarkId::new("sign", name), |b| {
            b.iter(|| {
                let mut frame = request();
                middleware
                    .sign_outgoing(&mut frame, Direction::OutgoingRequest, "CancelReservation")
                    .expect("sign");
                black_box(frame)
            })
        });

        let mut signed = request();
        middleware
            .sign_outgoing(&mut signed, Direction::OutgoingRequest, "CancelReservation")
            .expect("sign");
        group.bench_function(BenchmarkId::new("verify", name), |b| {
            b.iter(|| {
                black_box(
                    middleware
                        .verify_incoming(&signed, Direction::IncomingRequest, "CancelReservation")
                        .is_ok(),
                )
            })
        });
    }
    group.finish();
}

// ============================================================================
// Routing
// ============================================================================

fn bench_reply_hop(c: &mut Criterion) {
    let mut group = c.benchmark_group("routing");

    for length in [2usize, 4, 8, 16] {
        let hops: Vec<NodeId> = (0..length).map(|i| node(&format!("N{i}"))).collect();
        let path: NetworkPath = hops.iter().cloned().collect();
        let topology = Arc::new(Topology::new());
        topology.connect(hops[length - 2].clone(), ConnectionId::new(1));
        let router = Router::new(hops[length - 1].clone(), topology);

        group.bench_with_input(BenchmarkId::new("reply_hop", length), &path, |b, path| {
            b.iter(|| black_box(router.reply_hop(path).is_ok()))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_codec, bench_signing, bench_reply_hop);
criterion_main!(benches);
