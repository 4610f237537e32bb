//! Outbound calls to the host chain and the log that pins their results.
//!
//! Every call the kernel makes to the host chain during a fresh block is
//! recorded with its result. Re-evaluating an already computed height replays
//! the log and requires each result to reproduce exactly; committing the block
//! drops the log.

use std::{fmt, sync::Arc};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::value::Value;

/// One request to the host chain's side-effecting API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainCall {
    pub dest_port: String,
    pub message: Value,
}

impl ChainCall {
    pub fn new(dest_port: impl Into<String>, message: Value) -> Self {
        Self {
            dest_port: dest_port.into(),
            message,
        }
    }
}

/// A call and the result it produced, stored as a `[call, result]` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(ChainCall, Value)", into = "(ChainCall, Value)")]
pub struct ChainSendRecord {
    pub call: ChainCall,
    pub result: Value,
}

impl From<(ChainCall, Value)> for ChainSendRecord {
    fn from((call, result): (ChainCall, Value)) -> Self {
        Self { call, result }
    }
}

impl From<ChainSendRecord> for (ChainCall, Value) {
    fn from(record: ChainSendRecord) -> Self {
        (record.call, record.result)
    }
}

/// Failure reported by the host chain for one call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ChainError {
    pub message: String,
}

impl ChainError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// The host chain's side-effecting API.
pub trait HostChain: Send {
    fn send(&mut self, call: &ChainCall) -> Result<Value, ChainError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayMode {
    /// Re-issue every recorded call and require identical results.
    Assert,
    /// Drop the records without re-issuing anything.
    Discard,
}

#[derive(Debug, Clone, Error)]
pub enum ChainSendError {
    #[error("host chain rejected call to port '{port}': {message}")]
    Host { port: String, message: String },
    #[error(
        "replayed chain send #{index} to port '{}' diverged: expected {}, actual {}",
        .call.dest_port,
        .expected.to_json_string(),
        .actual.to_json_string()
    )]
    ReplayMismatch {
        index: usize,
        call: Box<ChainCall>,
        expected: Value,
        actual: Value,
    },
}

/// Append-only sequence of chain sends made since the last commit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainSendLog {
    records: Vec<ChainSendRecord>,
}

impl ChainSendLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: Vec<ChainSendRecord>) -> Self {
        Self { records }
    }

    pub fn records(&self) -> &[ChainSendRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Perform `call` against the host chain and pin its result.
    pub fn record(
        &mut self,
        chain: &mut dyn HostChain,
        call: ChainCall,
    ) -> Result<Value, ChainSendError> {
        let result = chain.send(&call).map_err(|err| ChainSendError::Host {
            port: call.dest_port.clone(),
            message: err.message,
        })?;
        self.records.push(ChainSendRecord {
            call,
            result: result.clone(),
        });
        Ok(result)
    }

    /// Replay the log. Returns the number of records processed.
    ///
    /// In `Assert` mode the log is left intact whether or not replay succeeds.
    pub fn replay(
        &mut self,
        chain: &mut dyn HostChain,
        mode: ReplayMode,
    ) -> Result<usize, ChainSendError> {
        match mode {
            ReplayMode::Discard => {
                let count = self.records.len();
                self.records.clear();
                Ok(count)
            }
            ReplayMode::Assert => {
                for (index, record) in self.records.iter().enumerate() {
                    let actual = chain.send(&record.call).map_err(|err| ChainSendError::Host {
                        port: record.call.dest_port.clone(),
                        message: err.message,
                    })?;
                    if actual != record.result {
                        return Err(ChainSendError::ReplayMismatch {
                            index,
                            call: Box::new(record.call.clone()),
                            expected: record.result.clone(),
                            actual,
                        });
                    }
                }
                Ok(self.records.len())
            }
        }
    }

    /// Replace the contents with records restored from a checkpoint.
    pub fn restore(&mut self, records: Vec<ChainSendRecord>) {
        self.records = records;
    }
}

struct SenderInner {
    chain: Box<dyn HostChain>,
    log: ChainSendLog,
}

/// Shared handle pairing the host chain with its send log.
///
/// The bridge device records through it while a block executes and the
/// driver uses it to replay, restore and snapshot the log.
#[derive(Clone)]
pub struct ChainSender {
    inner: Arc<Mutex<SenderInner>>,
}

impl fmt::Debug for ChainSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainSender")
            .field("records", &self.inner.lock().log.len())
            .finish()
    }
}

impl ChainSender {
    pub fn new(chain: impl HostChain + 'static) -> Self {
        Self::from_boxed(Box::new(chain))
    }

    pub fn from_boxed(chain: Box<dyn HostChain>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SenderInner {
                chain,
                log: ChainSendLog::new(),
            })),
        }
    }

    pub fn send(&self, call: ChainCall) -> Result<Value, ChainSendError> {
        let mut guard = self.inner.lock();
        let SenderInner { chain, log } = &mut *guard;
        log.record(chain.as_mut(), call)
    }

    pub fn replay(&self, mode: ReplayMode) -> Result<usize, ChainSendError> {
        let mut guard = self.inner.lock();
        let SenderInner { chain, log } = &mut *guard;
        log.replay(chain.as_mut(), mode)
    }

    pub fn restore(&self, records: Vec<ChainSendRecord>) {
        self.inner.lock().log.restore(records);
    }

    /// Copy of the records made since the last flush.
    pub fn records(&self) -> Vec<ChainSendRecord> {
        self.inner.lock().log.records().to_vec()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().log.is_empty()
    }
}
