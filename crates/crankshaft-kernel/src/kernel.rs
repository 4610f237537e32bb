use std::collections::BTreeMap;

use crankshaft_store::KvStore;

use crate::{action::BridgeSource, devices::DeviceIo, error::KernelResult, value::Value};

/// Work handed to the kernel by the devices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KernelInput {
    Mailbox { peer: String, seq: u64, body: String },
    Bridge { source: BridgeSource, body: Value },
    Timer { handle: u64, fired_at: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// One crank of progress was made.
    Ran,
    /// Nothing left to do.
    Idle,
}

/// The execution kernel, seen as an opaque "step one crank" engine.
///
/// Kernels load their own state from the kernel store when constructed and
/// stage it back through `persist`, which the driver calls right before the
/// store commit that also carries the checkpoint.
pub trait Kernel: Send {
    fn push_input(&mut self, input: KernelInput) -> KernelResult<()>;

    fn step(&mut self, io: &mut DeviceIo<'_>) -> KernelResult<StepOutcome>;

    /// Named counters reported by the kernel, mirrored into metrics.
    fn stats(&self) -> BTreeMap<String, u64>;

    fn persist(&mut self, store: &dyn KvStore) -> KernelResult<()>;
}
