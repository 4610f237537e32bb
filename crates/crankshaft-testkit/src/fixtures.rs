//! Block action builders. Block times follow heights: `time_at(h)`.

use crankshaft_kernel::{BlockAction, BridgeEvent, InboundDelivery, Value};

pub const GENESIS_TIME: u64 = 1_700_000_000;
pub const BLOCK_INTERVAL: u64 = 6;

pub fn time_at(height: u64) -> u64 {
    GENESIS_TIME + height * BLOCK_INTERVAL
}

pub fn begin(height: u64) -> BlockAction {
    BlockAction::begin(height, time_at(height))
}

pub fn end(height: u64) -> BlockAction {
    BlockAction::end(height, time_at(height))
}

pub fn commit(height: u64) -> BlockAction {
    BlockAction::commit(height, time_at(height))
}

pub fn deliver(
    height: u64,
    peer: &str,
    messages: impl IntoIterator<Item = (u64, impl Into<String>)>,
    ack: u64,
) -> BlockAction {
    BlockAction::DeliverInbound(InboundDelivery {
        peer: peer.to_string(),
        messages: messages
            .into_iter()
            .map(|(seq, body)| (seq, body.into()))
            .collect(),
        ack,
        block_height: height,
        block_time: time_at(height),
    })
}

/// A delivery carrying only an ack.
pub fn ack(height: u64, peer: &str, ack: u64) -> BlockAction {
    deliver(height, peer, Vec::<(u64, String)>::new(), ack)
}

pub fn ibc(height: u64, body: Value) -> BlockAction {
    BlockAction::IbcEvent(bridge_event(height, body))
}

pub fn provision(height: u64, body: Value) -> BlockAction {
    BlockAction::PleaseProvision(bridge_event(height, body))
}

fn bridge_event(height: u64, body: Value) -> BridgeEvent {
    BridgeEvent {
        block_height: height,
        block_time: time_at(height),
        body,
    }
}

/// `BEGIN_BLOCK`, `middle`, `END_BLOCK`; no commit.
pub fn block(height: u64, middle: impl IntoIterator<Item = BlockAction>) -> Vec<BlockAction> {
    let mut actions = vec![begin(height)];
    actions.extend(middle);
    actions.push(end(height));
    actions
}
