//! Host side of the bridge: the block-action state machine, the port bridge
//! that feeds it, configuration, logging and process assembly.

pub mod block;
pub mod config;
pub mod error;
pub mod launch;
pub mod logging;
pub mod port;

pub use block::BlockManager;
pub use config::HostConfig;
pub use error::{DecoherenceError, DecoherenceKind, HostError, HostResult};
pub use launch::{ACTION_PORT_NAME, Launched, launch};
pub use logging::init_logging;
pub use port::{
    AG_COSMOS_INIT, ActionPortHandler, PortBridge, PortHandle, PortHandler, PortId, PortRejection,
};
