//! Shared helpers for the integration tests.
//!
//! Each integration test compiles this module separately, so some helpers
//! look unused from any single test file.

#![allow(dead_code)]

use crankshaft_host::{DecoherenceKind, HostError};
use crankshaft_kernel::{BlockAction, Value};
use crankshaft_testkit::{TestBridge, deliver, ibc};

/// Some mailbox traffic and one bridge event, both deterministic in `height`.
pub fn workload(height: u64) -> Vec<BlockAction> {
    vec![
        deliver(height, "alice", [(height, format!("m{height}"))], 0),
        deliver(height, "bob", [(height, format!("call:fee-{height}"))], 0),
        ibc(
            height,
            Value::record([("amount", Value::Int(height as i64 * 10))]),
        ),
    ]
}

pub fn run_blocks(bridge: &mut TestBridge, heights: std::ops::RangeInclusive<u64>) {
    for height in heights {
        bridge.run_block(height, workload(height)).unwrap();
    }
}

pub fn assert_decohered(err: &HostError, kind: DecoherenceKind) {
    let decoherence = err
        .decoherence()
        .unwrap_or_else(|| panic!("expected decoherence, got {err}"));
    assert_eq!(decoherence.kind, kind, "{err}");
}

/// Wire form of an action, as the host sends it over the port.
pub fn wire(action: &BlockAction) -> serde_json::Value {
    serde_json::to_value(action).unwrap()
}
