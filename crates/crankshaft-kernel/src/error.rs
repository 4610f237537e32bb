use crankshaft_store::StoreError;
use thiserror::Error;

use crate::chain_send::ChainSendError;

pub type KernelResult<T> = Result<T, KernelError>;

#[derive(Debug, Error)]
pub enum KernelError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("chain send error: {0}")]
    ChainSend(#[from] ChainSendError),
    #[error("kernel step failed: {0}")]
    Step(String),
    #[error("mailbox device error: {0}")]
    Mailbox(String),
    #[error("timer device error: {0}")]
    Timer(String),
    #[error("checkpoint error: {0}")]
    Checkpoint(String),
    #[error("invalid driver config: {0}")]
    Config(String),
}
