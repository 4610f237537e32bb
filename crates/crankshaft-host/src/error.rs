use std::fmt;

use crankshaft_kernel::KernelError;
use crankshaft_store::StoreError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type HostResult<T> = Result<T, HostError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecoherenceKind {
    /// Actions for an already executed height differ from the saved ones.
    NonTrivialReset,
    /// A replayed chain send produced a different result.
    ReplayMismatch,
    /// The kernel failed while executing a fresh block.
    KernelFailure,
}

impl fmt::Display for DecoherenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DecoherenceKind::NonTrivialReset => "non-trivial reset requested",
            DecoherenceKind::ReplayMismatch => "replay mismatch",
            DecoherenceKind::KernelFailure => "kernel failure",
        })
    }
}

/// The latched error of a decohered bridge. Every call after the first
/// failure returns a clone of it.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct DecoherenceError {
    pub kind: DecoherenceKind,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum HostError {
    #[error("kernel error: {0}")]
    Kernel(#[from] KernelError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("decohered: {0}")]
    Decohered(DecoherenceError),
    #[error("commit for height {committed} but computed height is {computed}")]
    CommitHeightMismatch { committed: u64, computed: u64 },
    #[error("bootstrap error: {0}")]
    Bootstrap(String),
    #[error("invalid action: {0}")]
    InvalidAction(String),
    #[error("invalid host config: {0}")]
    Config(String),
    #[error("port error: {0}")]
    Port(String),
}

impl HostError {
    /// Stable machine-readable code, used in port rejections.
    pub fn code(&self) -> &'static str {
        match self {
            HostError::Kernel(_) => "kernel_error",
            HostError::Store(_) => "store_error",
            HostError::Decohered(_) => "decohered",
            HostError::CommitHeightMismatch { .. } => "commit_height_mismatch",
            HostError::Bootstrap(_) => "bootstrap_error",
            HostError::InvalidAction(_) => "invalid_action",
            HostError::Config(_) => "config_error",
            HostError::Port(_) => "port_error",
        }
    }

    pub fn decoherence(&self) -> Option<&DecoherenceError> {
        match self {
            HostError::Decohered(err) => Some(err),
            _ => None,
        }
    }
}
