use std::{cmp::Reverse, collections::BinaryHeap};

use crankshaft_store::{KvStore, get_json, set_json};
use serde::{Deserialize, Serialize};

use crate::error::KernelResult;

pub const TIMER_STATE_KEY: &str = "device.timer";

/// Persisted form of the timer device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerState {
    pub now: u64,
    pub next_handle: u64,
    /// `(deadline, handle)` pairs, earliest first.
    pub pending: Vec<(u64, u64)>,
}

/// Logical clock driven by block time, with a min-heap of deadlines.
///
/// Ordering is `(deadline, handle)` so timers sharing a deadline fire in the
/// order they were set.
#[derive(Debug, Default)]
pub struct TimerDevice {
    now: u64,
    next_handle: u64,
    heap: BinaryHeap<Reverse<(u64, u64)>>,
}

impl TimerDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(store: &dyn KvStore) -> KernelResult<Self> {
        let state: TimerState = get_json(store, TIMER_STATE_KEY)?.unwrap_or_default();
        Ok(Self::from_state(state))
    }

    pub fn from_state(state: TimerState) -> Self {
        Self {
            now: state.now,
            next_handle: state.next_handle,
            heap: state.pending.into_iter().map(Reverse).collect(),
        }
    }

    pub fn state(&self) -> TimerState {
        let mut pending: Vec<(u64, u64)> = self.heap.iter().map(|Reverse(entry)| *entry).collect();
        pending.sort_unstable();
        TimerState {
            now: self.now,
            next_handle: self.next_handle,
            pending,
        }
    }

    /// Stage the device state; the caller commits.
    pub fn stage(&self, store: &dyn KvStore) -> KernelResult<()> {
        set_json(store, TIMER_STATE_KEY, &self.state())?;
        Ok(())
    }

    pub fn now(&self) -> u64 {
        self.now
    }

    pub fn set(&mut self, deadline: u64) -> u64 {
        self.next_handle += 1;
        let handle = self.next_handle;
        self.heap.push(Reverse((deadline, handle)));
        handle
    }

    /// Advance the clock to `time` and pop every due timer as
    /// `(handle, deadline)`. The clock never moves backwards.
    pub fn poll(&mut self, time: u64) -> Vec<(u64, u64)> {
        if time < self.now {
            log::warn!("timer: ignoring clock regression {} -> {time}", self.now);
        } else {
            self.now = time;
        }
        let mut due = Vec::new();
        while let Some(Reverse((deadline, handle))) = self.heap.peek().copied() {
            if deadline > self.now {
                break;
            }
            self.heap.pop();
            due.push((handle, deadline));
        }
        due
    }

    pub fn pending(&self) -> usize {
        self.heap.len()
    }
}
