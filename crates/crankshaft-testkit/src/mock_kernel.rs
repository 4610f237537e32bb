use std::{
    collections::{BTreeMap, VecDeque},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use crankshaft_kernel::{
    BridgeSource, DeviceIo, Kernel, KernelError, KernelInput, KernelResult, StepOutcome, Value,
};
use crankshaft_store::{KvStore, get_json, set_json};
use serde::{Deserialize, Serialize};

/// Kernel store key holding [`MockState`].
pub const MOCK_STATE_KEY: &str = "kernel.mock";

/// Port the mock kernel calls for `call:<text>` mailbox messages.
pub const CALL_PORT: &str = "bank";

/// One pending unit of work; each takes exactly one crank.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Work {
    Unit {
        label: String,
    },
    Mailbox {
        peer: String,
        seq: u64,
        body: String,
    },
    Bridge {
        source: BridgeSource,
        body: Value,
    },
    Timer {
        handle: u64,
        fired_at: u64,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MockState {
    pub queue: VecDeque<Work>,
    pub cranks: u64,
    /// One line per processed unit, in processing order.
    pub journal: Vec<String>,
}

/// Deterministic kernel for tests.
///
/// Mailbox bodies steer it: `fail` makes the crank fail, `reply` answers the
/// peer with `re:<seq>`, `sleep:<secs>` sets a timer and `call:<text>` makes a
/// chain send to [`CALL_PORT`]. Bridge events are forwarded to the chain on
/// the port named after their source.
#[derive(Debug, Default)]
pub struct MockKernel {
    state: MockState,
    steps: Arc<AtomicU64>,
}

impl MockKernel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume from the state last persisted into `store`.
    pub fn load(store: &dyn KvStore) -> KernelResult<Self> {
        let state = get_json(store, MOCK_STATE_KEY)?.unwrap_or_default();
        Ok(Self {
            state,
            steps: Arc::default(),
        })
    }

    /// Count cranks into `steps` (process-local, not persisted).
    pub fn with_step_counter(mut self, steps: Arc<AtomicU64>) -> Self {
        self.steps = steps;
        self
    }

    pub fn step_counter(&self) -> Arc<AtomicU64> {
        self.steps.clone()
    }

    /// Queue `units` units of work that need no input.
    pub fn seed(&mut self, units: usize) {
        let start = self.state.queue.len();
        for index in start..start + units {
            self.state.queue.push_back(Work::Unit {
                label: format!("seed-{index}"),
            });
        }
    }

    pub fn state(&self) -> &MockState {
        &self.state
    }

    pub fn journal(&self) -> &[String] {
        &self.state.journal
    }

    pub fn pending(&self) -> usize {
        self.state.queue.len()
    }

    fn run(&mut self, work: Work, io: &mut DeviceIo<'_>) -> KernelResult<String> {
        match work {
            Work::Unit { label } => Ok(format!("unit {label}")),
            Work::Timer { handle, fired_at } => Ok(format!("timer {handle} @ {fired_at}")),
            Work::Bridge { source, body } => {
                let result = io.bridge_send(source.as_str(), body.clone())?;
                Ok(format!("bridge {} {body} -> {result}", source.as_str()))
            }
            Work::Mailbox { peer, seq, body } => {
                let line = format!("mailbox {peer}#{seq} {body}");
                if body == "fail" {
                    return Err(KernelError::Step(format!(
                        "message {seq} from {peer} asked to fail"
                    )));
                }
                if body == "reply" {
                    let out = io.mailbox_send(&peer, format!("re:{seq}"))?;
                    return Ok(format!("{line} -> {peer}#{out}"));
                }
                if let Some(secs) = body.strip_prefix("sleep:") {
                    let secs: u64 = secs
                        .parse()
                        .map_err(|err| KernelError::Step(format!("bad sleep '{secs}': {err}")))?;
                    let deadline = io.now() + secs;
                    let handle = io.set_timer(deadline);
                    return Ok(format!("{line} -> timer {handle} @ {deadline}"));
                }
                if let Some(text) = body.strip_prefix("call:") {
                    let result = io.bridge_send(CALL_PORT, Value::text(text))?;
                    return Ok(format!("{line} -> {result}"));
                }
                Ok(line)
            }
        }
    }
}

impl Kernel for MockKernel {
    fn push_input(&mut self, input: KernelInput) -> KernelResult<()> {
        let work = match input {
            KernelInput::Mailbox { peer, seq, body } => Work::Mailbox { peer, seq, body },
            KernelInput::Bridge { source, body } => Work::Bridge { source, body },
            KernelInput::Timer { handle, fired_at } => Work::Timer { handle, fired_at },
        };
        self.state.queue.push_back(work);
        Ok(())
    }

    fn step(&mut self, io: &mut DeviceIo<'_>) -> KernelResult<StepOutcome> {
        let Some(work) = self.state.queue.pop_front() else {
            return Ok(StepOutcome::Idle);
        };
        let line = self.run(work, io)?;
        log::trace!("mock kernel crank {}: {line}", self.state.cranks);
        self.state.journal.push(line);
        self.state.cranks += 1;
        self.steps.fetch_add(1, Ordering::SeqCst);
        Ok(StepOutcome::Ran)
    }

    fn stats(&self) -> BTreeMap<String, u64> {
        BTreeMap::from([
            ("cranks".to_string(), self.state.cranks),
            ("pending".to_string(), self.state.queue.len() as u64),
        ])
    }

    fn persist(&mut self, store: &dyn KvStore) -> KernelResult<()> {
        set_json(store, MOCK_STATE_KEY, &self.state)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crankshaft_store::MemKvStore;

    #[test]
    fn state_survives_persist_and_load() {
        let store = MemKvStore::new();
        let mut kernel = MockKernel::new();
        kernel.seed(2);
        kernel
            .push_input(KernelInput::Timer {
                handle: 1,
                fired_at: 10,
            })
            .unwrap();
        kernel.persist(&store).unwrap();
        store.commit().unwrap();

        let loaded = MockKernel::load(&store).unwrap();
        assert_eq!(loaded.state(), kernel.state());
        assert_eq!(loaded.pending(), 3);
    }

    #[test]
    fn missing_state_is_empty() {
        let kernel = MockKernel::load(&MemKvStore::new()).unwrap();
        assert_eq!(kernel.pending(), 0);
        assert_eq!(kernel.stats()["cranks"], 0);
    }
}
