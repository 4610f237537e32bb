use std::collections::{BTreeMap, BTreeSet};

use crankshaft_store::{DynKvStore, get_json, set_json};
use serde::{Deserialize, Serialize};

use crate::error::{KernelError, KernelResult};

pub const MAILBOX_KEY_PREFIX: &str = "mailbox.";

/// Persisted mailbox state for one peer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerMailbox {
    /// Highest inbound sequence number handed to the kernel.
    pub inbound_ack: u64,
    /// Outbound messages the peer has not acknowledged yet.
    pub outbound: Vec<(u64, String)>,
    pub next_outbound_seq: u64,
}

/// Ordered, ack-tracked message queues between the kernel and its peers.
///
/// Peer records live under `mailbox.<peer>` in two places. The kernel store
/// copy is authoritative and only becomes durable with the checkpoint that
/// covers it. The transport store copy is what relayers read.
pub struct MailboxDevice {
    transport: DynKvStore,
    state: DynKvStore,
    peers: BTreeMap<String, PeerMailbox>,
    dirty: BTreeSet<String>,
}

impl std::fmt::Debug for MailboxDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailboxDevice")
            .field("peers", &self.peers.len())
            .field("dirty", &self.dirty)
            .finish()
    }
}

fn peer_key(peer: &str) -> String {
    format!("{MAILBOX_KEY_PREFIX}{peer}")
}

impl MailboxDevice {
    pub fn new(transport: DynKvStore, state: DynKvStore) -> Self {
        Self {
            transport,
            state,
            peers: BTreeMap::new(),
            dirty: BTreeSet::new(),
        }
    }

    fn peer_mut(&mut self, peer: &str) -> KernelResult<&mut PeerMailbox> {
        if !self.peers.contains_key(peer) {
            let loaded: PeerMailbox = get_json(self.state.as_ref(), &peer_key(peer))?
                .unwrap_or_default();
            self.peers.insert(peer.to_string(), loaded);
        }
        self.peers
            .get_mut(peer)
            .ok_or_else(|| KernelError::Mailbox(format!("peer '{peer}' vanished from cache")))
    }

    /// Current state for `peer`, loading it from the store if needed.
    pub fn peer(&mut self, peer: &str) -> KernelResult<PeerMailbox> {
        Ok(self.peer_mut(peer)?.clone())
    }

    /// Accept inbound traffic from `peer`.
    ///
    /// Returns the messages that are new, in order. Anything at or below the
    /// highest sequence number already delivered is a duplicate. `ack` prunes
    /// our outbound queue.
    pub fn deliver(
        &mut self,
        peer: &str,
        messages: &[(u64, String)],
        ack: u64,
    ) -> KernelResult<Vec<(u64, String)>> {
        let state = self.peer_mut(peer)?;
        let mut fresh = Vec::new();
        for (seq, body) in messages {
            if *seq <= state.inbound_ack {
                log::debug!("mailbox: dropping duplicate message {seq} from {peer}");
                continue;
            }
            state.inbound_ack = *seq;
            fresh.push((*seq, body.clone()));
        }
        let before = state.outbound.len();
        state.outbound.retain(|(seq, _)| *seq > ack);
        let pruned = before != state.outbound.len();
        if !fresh.is_empty() || pruned {
            self.dirty.insert(peer.to_string());
        }
        Ok(fresh)
    }

    /// Queue an outbound message for `peer`.
    pub fn send(&mut self, peer: &str, body: String) -> KernelResult<u64> {
        let state = self.peer_mut(peer)?;
        state.next_outbound_seq += 1;
        let seq = state.next_outbound_seq;
        state.outbound.push((seq, body));
        self.dirty.insert(peer.to_string());
        Ok(seq)
    }

    /// Publish every touched peer to the transport store and commit it, and
    /// stage the same records in the kernel store. The kernel store is left
    /// uncommitted; the caller commits it with the checkpoint.
    pub fn save(&mut self) -> KernelResult<()> {
        for peer in std::mem::take(&mut self.dirty) {
            if let Some(record) = self.peers.get(&peer) {
                let key = peer_key(&peer);
                set_json(self.state.as_ref(), &key, record)?;
                set_json(self.transport.as_ref(), &key, record)?;
            }
        }
        self.transport.commit()?;
        Ok(())
    }

    /// Close the transport store. The kernel store belongs to the driver.
    pub fn close(&mut self) -> KernelResult<()> {
        self.transport.close()?;
        Ok(())
    }
}
