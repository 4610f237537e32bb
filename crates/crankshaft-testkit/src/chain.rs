use std::{collections::BTreeSet, sync::Arc};

use crankshaft_kernel::{ChainCall, ChainError, HostChain, Value};
use parking_lot::Mutex;

#[derive(Debug, Default)]
struct ChainState {
    calls: Vec<ChainCall>,
    salt: i64,
    failing_ports: BTreeSet<String>,
}

/// Host chain fake. Results are a pure function of the call and the current
/// salt, so a replay against an unchanged chain always matches. Clones share
/// state, which lets a test keep the chain across a simulated restart.
#[derive(Debug, Clone, Default)]
pub struct RecordingChain {
    state: Arc<Mutex<ChainState>>,
}

impl RecordingChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call received so far, replays included.
    pub fn calls(&self) -> Vec<ChainCall> {
        self.state.lock().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.state.lock().calls.len()
    }

    /// Change every result from now on.
    pub fn set_salt(&self, salt: i64) {
        self.state.lock().salt = salt;
    }

    /// Reject every later call to `port`.
    pub fn fail_port(&self, port: impl Into<String>) {
        self.state.lock().failing_ports.insert(port.into());
    }
}

impl HostChain for RecordingChain {
    fn send(&mut self, call: &ChainCall) -> Result<Value, ChainError> {
        let mut state = self.state.lock();
        state.calls.push(call.clone());
        if state.failing_ports.contains(&call.dest_port) {
            return Err(ChainError::new(format!(
                "port '{}' is unavailable",
                call.dest_port
            )));
        }
        Ok(Value::record([
            ("port", Value::text(call.dest_port.clone())),
            ("echo", call.message.clone()),
            ("salt", Value::Int(state.salt)),
        ]))
    }
}
