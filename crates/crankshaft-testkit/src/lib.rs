//! Test utilities for exercising the bridge with deterministic fixtures.
//!
//! - [`MockKernel`]: a kernel whose every unit of work is one crank, with a
//!   shared step counter and state persisted in the kernel store.
//! - [`RecordingChain`]: a pure host-chain fake that records every call and
//!   can be told to diverge or fail.
//! - [`fixtures`]: block action builders.
//! - [`TestBridge`]: a block manager over in-memory stores that can be
//!   crashed and restarted from its committed state.

pub mod chain;
pub mod fixtures;
pub mod harness;
pub mod mock_kernel;

pub use chain::RecordingChain;
pub use fixtures::{
    BLOCK_INTERVAL, GENESIS_TIME, ack, begin, block, commit, deliver, end, ibc, provision, time_at,
};
pub use harness::TestBridge;
pub use mock_kernel::{MOCK_STATE_KEY, MockKernel, MockState, Work};
