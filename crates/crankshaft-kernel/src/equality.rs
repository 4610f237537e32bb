//! Structural equality over block actions and values that tolerates aliased
//! substructure.
//!
//! Shared `Arc` nodes are compared once per pointer pair. A pair already on
//! the visited set is either being compared further up the stack or has
//! already compared equal (the walk stops at the first difference), so it is
//! treated as equal on a second visit.

use std::{collections::HashSet, sync::Arc};

use crate::{
    action::{BlockAction, BridgeEvent},
    value::Value,
};

/// Deep equality of two action sequences.
pub fn deep_equal_actions(left: &[BlockAction], right: &[BlockAction]) -> bool {
    let mut walker = DeepEq::default();
    left.len() == right.len()
        && left
            .iter()
            .zip(right)
            .all(|(l, r)| walker.action(l, r))
}

/// Deep equality of two values.
pub fn deep_equal_values(left: &Value, right: &Value) -> bool {
    DeepEq::default().value(left, right)
}

#[derive(Default)]
struct DeepEq {
    visited: HashSet<(usize, usize)>,
}

impl DeepEq {
    /// Returns false when the pointer pair was seen before.
    fn enter<T>(&mut self, left: &Arc<T>, right: &Arc<T>) -> bool {
        let key = (
            Arc::as_ptr(left) as *const () as usize,
            Arc::as_ptr(right) as *const () as usize,
        );
        self.visited.insert(key)
    }

    fn action(&mut self, left: &BlockAction, right: &BlockAction) -> bool {
        match (left, right) {
            (BlockAction::BeginBlock(l), BlockAction::BeginBlock(r))
            | (BlockAction::EndBlock(l), BlockAction::EndBlock(r))
            | (BlockAction::CommitBlock(l), BlockAction::CommitBlock(r)) => l == r,
            (BlockAction::DeliverInbound(l), BlockAction::DeliverInbound(r)) => {
                l.peer == r.peer
                    && l.ack == r.ack
                    && l.block_height == r.block_height
                    && l.block_time == r.block_time
                    && l.messages == r.messages
            }
            (BlockAction::IbcEvent(l), BlockAction::IbcEvent(r))
            | (BlockAction::PleaseProvision(l), BlockAction::PleaseProvision(r)) => {
                self.bridge_event(l, r)
            }
            _ => false,
        }
    }

    fn bridge_event(&mut self, left: &BridgeEvent, right: &BridgeEvent) -> bool {
        left.block_height == right.block_height
            && left.block_time == right.block_time
            && self.value(&left.body, &right.body)
    }

    fn value(&mut self, left: &Value, right: &Value) -> bool {
        match (left, right) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(l), Value::Bool(r)) => l == r,
            (Value::Int(l), Value::Int(r)) => l == r,
            (Value::Number(l), Value::Number(r)) => l == r,
            (Value::Text(l), Value::Text(r)) => l == r,
            (Value::List(l), Value::List(r)) => {
                if Arc::ptr_eq(l, r) || !self.enter(l, r) {
                    return true;
                }
                l.len() == r.len() && l.iter().zip(r.iter()).all(|(a, b)| self.value(a, b))
            }
            (Value::Record(l), Value::Record(r)) => {
                if Arc::ptr_eq(l, r) || !self.enter(l, r) {
                    return true;
                }
                l.len() == r.len()
                    && l.iter()
                        .zip(r.iter())
                        .all(|((lk, lv), (rk, rv))| lk == rk && self.value(lv, rv))
            }
            _ => false,
        }
    }
}
