//! Block actions delivered by consensus, in the wire shape the host sends:
//! a JSON object tagged by `type` with camelCase fields.

use serde::{Deserialize, Serialize};

use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockInfo {
    pub block_height: u64,
    pub block_time: u64,
}

impl BlockInfo {
    pub fn new(block_height: u64, block_time: u64) -> Self {
        Self {
            block_height,
            block_time,
        }
    }
}

/// Mailbox traffic from one peer: `messages` are `(seq, body)` pairs and
/// `ack` is the highest of our outbound messages the peer has seen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundDelivery {
    pub peer: String,
    pub messages: Vec<(u64, String)>,
    pub ack: u64,
    pub block_height: u64,
    pub block_time: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeEvent {
    pub block_height: u64,
    pub block_time: u64,
    pub body: Value,
}

/// Inbound bridge path an event is routed through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeSource {
    Dibc,
    Provision,
}

impl BridgeSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            BridgeSource::Dibc => "dibc",
            BridgeSource::Provision => "provision",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BlockAction {
    BeginBlock(BlockInfo),
    DeliverInbound(InboundDelivery),
    IbcEvent(BridgeEvent),
    PleaseProvision(BridgeEvent),
    EndBlock(BlockInfo),
    CommitBlock(BlockInfo),
}

impl BlockAction {
    pub fn begin(height: u64, time: u64) -> Self {
        BlockAction::BeginBlock(BlockInfo::new(height, time))
    }

    pub fn end(height: u64, time: u64) -> Self {
        BlockAction::EndBlock(BlockInfo::new(height, time))
    }

    pub fn commit(height: u64, time: u64) -> Self {
        BlockAction::CommitBlock(BlockInfo::new(height, time))
    }

    /// Wire name of the action, as carried in the `type` field.
    pub fn kind(&self) -> &'static str {
        match self {
            BlockAction::BeginBlock(_) => "BEGIN_BLOCK",
            BlockAction::DeliverInbound(_) => "DELIVER_INBOUND",
            BlockAction::IbcEvent(_) => "IBC_EVENT",
            BlockAction::PleaseProvision(_) => "PLEASE_PROVISION",
            BlockAction::EndBlock(_) => "END_BLOCK",
            BlockAction::CommitBlock(_) => "COMMIT_BLOCK",
        }
    }

    pub fn height(&self) -> u64 {
        match self {
            BlockAction::BeginBlock(info)
            | BlockAction::EndBlock(info)
            | BlockAction::CommitBlock(info) => info.block_height,
            BlockAction::DeliverInbound(delivery) => delivery.block_height,
            BlockAction::IbcEvent(event) | BlockAction::PleaseProvision(event) => {
                event.block_height
            }
        }
    }

    pub fn time(&self) -> u64 {
        match self {
            BlockAction::BeginBlock(info)
            | BlockAction::EndBlock(info)
            | BlockAction::CommitBlock(info) => info.block_time,
            BlockAction::DeliverInbound(delivery) => delivery.block_time,
            BlockAction::IbcEvent(event) | BlockAction::PleaseProvision(event) => {
                event.block_time
            }
        }
    }

    /// Bridge source for the two bridge-event flavors.
    pub fn bridge_source(&self) -> Option<BridgeSource> {
        match self {
            BlockAction::IbcEvent(_) => Some(BridgeSource::Dibc),
            BlockAction::PleaseProvision(_) => Some(BridgeSource::Provision),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_wire_actions() {
        let raw = json!({
            "type": "DELIVER_INBOUND",
            "peer": "agoric1peer",
            "messages": [[1, "hello"], [2, "world"]],
            "ack": 4,
            "blockHeight": 12,
            "blockTime": 1700000000u64
        });
        let action: BlockAction = serde_json::from_value(raw).unwrap();
        let BlockAction::DeliverInbound(delivery) = &action else {
            panic!("unexpected action {action:?}");
        };
        assert_eq!(delivery.messages[1], (2, "world".to_string()));
        assert_eq!(action.kind(), "DELIVER_INBOUND");
        assert_eq!(action.height(), 12);
        assert_eq!(action.time(), 1_700_000_000);
    }

    #[test]
    fn bridge_flavors_share_shape() {
        let ibc: BlockAction = serde_json::from_value(json!({
            "type": "IBC_EVENT",
            "blockHeight": 3,
            "blockTime": 30,
            "body": {"event": "channelOpenInit"}
        }))
        .unwrap();
        let provision: BlockAction = serde_json::from_value(json!({
            "type": "PLEASE_PROVISION",
            "blockHeight": 3,
            "blockTime": 30,
            "body": {"event": "channelOpenInit"}
        }))
        .unwrap();
        assert_eq!(ibc.bridge_source(), Some(BridgeSource::Dibc));
        assert_eq!(provision.bridge_source(), Some(BridgeSource::Provision));
        assert_ne!(ibc, provision);
    }

    #[test]
    fn bridge_bodies_carry_any_json_number() {
        let raw = json!({
            "type": "IBC_EVENT",
            "blockHeight": 3,
            "blockTime": 30,
            "body": {"amount": 1.5, "denom": 18446744073709551615u64}
        });
        let action: BlockAction = serde_json::from_value(raw.clone()).unwrap();
        let BlockAction::IbcEvent(event) = &action else {
            panic!("unexpected action {action:?}");
        };
        assert_eq!(event.body.get("amount").map(Value::kind), Some("number"));
        assert_eq!(serde_json::to_value(&action).unwrap(), raw);
    }

    #[test]
    fn encodes_tag_and_camel_case() {
        let json = serde_json::to_value(BlockAction::end(5, 50)).unwrap();
        assert_eq!(
            json,
            json!({"type": "END_BLOCK", "blockHeight": 5, "blockTime": 50})
        );
    }

    #[test]
    fn unknown_type_is_rejected() {
        let err = serde_json::from_value::<BlockAction>(json!({
            "type": "SWING_STORE_EXPORT",
            "blockHeight": 1,
            "blockTime": 1
        }));
        assert!(err.is_err());
    }
}
