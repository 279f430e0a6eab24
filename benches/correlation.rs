//! Correlation benchmark suite.
//!
//! - Pending-map transitions at different backlog sizes
//! - Frame decoding and encoding
//! - Full execute round trip over a loopback socket
//!
//! Run with: cargo bench --bench correlation
//! Results saved to: target/criterion/

use std::hint::black_box;
use std::sync::Arc;

use agent_bridge::protocol::{decode, encode_execute};
use agent_bridge::{
    Bridge, BridgeOptions, BridgeState, LocalOptions, LocalTransport, PendingEntry, RequestId,
    RequestKind,
};
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::runtime::Runtime;
use tokio_tungstenite::tungstenite::Message;

// ============================================================================
// Benchmark Parameters
// ============================================================================

const BACKLOGS: &[usize] = &[0, 100, 10_000];

// ============================================================================
// Benchmark: State Transitions
// ============================================================================

fn backlog(size: usize) -> BridgeState {
    (0..size).fold(BridgeState::new(), |state, _| {
        let (state, id) = state.next_request_id();
        let (entry, _rx) = PendingEntry::new(RequestKind::Execute);
        state.add_pending(id, entry)
    })
}

fn bench_transitions(c: &mut Criterion) {
    let mut group = c.benchmark_group("state_transition");

    for &size in BACKLOGS {
        group.bench_with_input(BenchmarkId::new("register_settle", size), &size, |b, &size| {
            let mut state = Some(backlog(size));
            b.iter(|| {
                let current = state.take().unwrap_or_default();
                let (current, id) = current.next_request_id();
                let (entry, rx) = PendingEntry::new(RequestKind::Execute);
                let current = current.add_pending(id, entry);
                let (current, entry) = current.remove_pending(&id);
                if let Some(entry) = entry {
                    entry.resolve(Value::Null);
                }
                black_box(rx);
                state = Some(current);
            });
        });
    }

    group.finish();
}

// ============================================================================
// Benchmark: Codec
// ============================================================================

fn bench_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec");

    let result = json!({
        "type": "EXECUTION_RESULT",
        "requestId": "42-1700000000000",
        "success": true,
        "result": {"title": "Example", "links": (0..32).collect::<Vec<_>>()},
    })
    .to_string();
    group.bench_function("decode_execution_result", |b| {
        b.iter(|| decode(black_box(&result)))
    });

    let unknown = r#"{"type":"TELEMETRY","payload":{"cpu":0.4}}"#;
    group.bench_function("decode_unknown", |b| b.iter(|| decode(black_box(unknown))));

    let script = "return Array.from(document.querySelectorAll('a')).map(a => a.href);";
    let id = RequestId::new(42, 1_700_000_000_000);
    group.bench_function("encode_execute", |b| {
        b.iter(|| encode_execute(black_box(id), black_box(script)))
    });

    group.finish();
}

// ============================================================================
// Benchmark: Round Trip
// ============================================================================

fn bench_round_trip(c: &mut Criterion) {
    let rt = Runtime::new().expect("runtime");

    let transport = Arc::new(LocalTransport::new(LocalOptions::default().with_port(0)));
    let bridge = Bridge::new(transport.clone(), BridgeOptions::new());

    rt.block_on(async {
        bridge.start().await.expect("bridge starts");
        let url = transport.ws_url().expect("listening");
        let (mut agent, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .expect("agent connects");
        agent
            .send(Message::Text(r#"{"type":"HANDSHAKE"}"#.to_string().into()))
            .await
            .expect("handshake sent");

        // Echo agent: answers every command with its script.
        tokio::spawn(async move {
            while let Some(Ok(Message::Text(text))) = agent.next().await {
                let Ok(frame) = serde_json::from_str::<Value>(&text) else {
                    continue;
                };
                let reply = json!({
                    "type": "EXECUTION_RESULT",
                    "requestId": frame["requestId"],
                    "success": true,
                    "result": frame["script"],
                });
                if agent.send(Message::Text(reply.to_string().into())).await.is_err() {
                    break;
                }
            }
        });

        while !bridge.is_connected() {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    });

    let mut group = c.benchmark_group("round_trip");
    group.sample_size(20);
    group.bench_function("execute_remote", |b| {
        b.to_async(&rt)
            .iter(|| async { bridge.execute_remote(black_box("1+1")).await });
    });
    group.finish();

    rt.block_on(bridge.stop());
}

criterion_group!(benches, bench_transitions, bench_codec, bench_round_trip);
criterion_main!(benches);
