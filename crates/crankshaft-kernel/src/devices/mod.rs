//! Devices the kernel reaches the outside world through while cranking.

mod bridge;
mod mailbox;
mod timer;

pub use bridge::BridgeDevice;
pub use mailbox::{MAILBOX_KEY_PREFIX, MailboxDevice, PeerMailbox};
pub use timer::{TIMER_STATE_KEY, TimerDevice, TimerState};

use crate::{error::KernelResult, value::Value};

/// Device access granted to the kernel for the duration of one crank.
pub struct DeviceIo<'a> {
    pub(crate) bridge: &'a BridgeDevice,
    pub(crate) mailbox: &'a mut MailboxDevice,
    pub(crate) timer: &'a mut TimerDevice,
}

impl<'a> DeviceIo<'a> {
    pub fn new(
        bridge: &'a BridgeDevice,
        mailbox: &'a mut MailboxDevice,
        timer: &'a mut TimerDevice,
    ) -> Self {
        Self {
            bridge,
            mailbox,
            timer,
        }
    }

    /// Call the host chain. The call and its result land in the send log.
    pub fn bridge_send(&mut self, dest_port: &str, message: Value) -> KernelResult<Value> {
        self.bridge.send(dest_port, message)
    }

    /// Queue an outbound mailbox message; returns its sequence number.
    pub fn mailbox_send(&mut self, peer: &str, body: impl Into<String>) -> KernelResult<u64> {
        self.mailbox.send(peer, body.into())
    }

    /// Schedule a timer; returns its handle.
    pub fn set_timer(&mut self, deadline: u64) -> u64 {
        self.timer.set(deadline)
    }

    /// Current block time as seen by the timer device.
    pub fn now(&self) -> u64 {
        self.timer.now()
    }
}
