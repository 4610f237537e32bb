//! Deterministic kernel driving: block actions, the outbound chain-send log,
//! kernel devices, checkpoints and the per-block crank loop.

pub mod action;
pub mod chain_send;
pub mod checkpoint;
pub mod config;
pub mod devices;
pub mod driver;
pub mod equality;
pub mod error;
pub mod kernel;
pub mod metrics;
pub mod value;

pub use action::{BlockAction, BlockInfo, BridgeEvent, BridgeSource, InboundDelivery};
pub use chain_send::{
    ChainCall, ChainError, ChainSendError, ChainSendLog, ChainSendRecord, ChainSender, HostChain,
    ReplayMode,
};
pub use checkpoint::{CHECKPOINT_KEY, Checkpoint};
pub use config::DriverConfig;
pub use devices::DeviceIo;
pub use driver::{EndBlockSummary, KernelDriver};
pub use equality::{deep_equal_actions, deep_equal_values};
pub use error::{KernelError, KernelResult};
pub use kernel::{Kernel, KernelInput, StepOutcome};
pub use metrics::{MetricsSink, NopSink, PrometheusSink, SharedSink, StatsMirror};
pub use value::Value;
