use crate::{
    action::BridgeSource,
    chain_send::{ChainCall, ChainSender},
    error::KernelResult,
    kernel::KernelInput,
    value::Value,
};

/// Two-way bridge between the kernel and the host chain.
///
/// Outbound calls go through the shared [`ChainSender`] so they are pinned in
/// the send log; inbound events become kernel inputs.
#[derive(Debug, Clone)]
pub struct BridgeDevice {
    sender: ChainSender,
    inbound_seen: u64,
}

impl BridgeDevice {
    pub fn new(sender: ChainSender) -> Self {
        Self {
            sender,
            inbound_seen: 0,
        }
    }

    pub fn sender(&self) -> &ChainSender {
        &self.sender
    }

    pub fn send(&self, dest_port: &str, message: Value) -> KernelResult<Value> {
        log::debug!("bridge send to '{dest_port}'");
        Ok(self.sender.send(ChainCall::new(dest_port, message))?)
    }

    pub fn inbound(&mut self, source: BridgeSource, body: Value) -> KernelInput {
        self.inbound_seen += 1;
        KernelInput::Bridge { source, body }
    }

    /// Inbound events routed since the process started.
    pub fn inbound_seen(&self) -> u64 {
        self.inbound_seen
    }
}
