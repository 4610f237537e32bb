use crankshaft_store::{KvStore, digest_json, get_json, set_json};
use serde::{Deserialize, Serialize};

use crate::{
    action::BlockAction,
    chain_send::ChainSendRecord,
    error::{KernelError, KernelResult},
};

/// Key of the checkpoint record in the kernel store.
pub const CHECKPOINT_KEY: &str = "host.checkpoint";

type CheckpointTuple = (u64, Vec<BlockAction>, Vec<ChainSendRecord>);

/// The last durably executed block: its height, the actions that produced it
/// and the chain sends it made. Stored as `[savedHeight, savedActions,
/// savedChainSends]`; a missing record reads as `[0, [], []]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "CheckpointTuple", into = "CheckpointTuple")]
pub struct Checkpoint {
    pub saved_height: u64,
    pub saved_actions: Vec<BlockAction>,
    pub saved_chain_sends: Vec<ChainSendRecord>,
}

impl From<CheckpointTuple> for Checkpoint {
    fn from((saved_height, saved_actions, saved_chain_sends): CheckpointTuple) -> Self {
        Self {
            saved_height,
            saved_actions,
            saved_chain_sends,
        }
    }
}

impl From<Checkpoint> for CheckpointTuple {
    fn from(checkpoint: Checkpoint) -> Self {
        (
            checkpoint.saved_height,
            checkpoint.saved_actions,
            checkpoint.saved_chain_sends,
        )
    }
}

impl Checkpoint {
    pub fn load(store: &dyn KvStore) -> KernelResult<Self> {
        get_json(store, CHECKPOINT_KEY)
            .map(Option::unwrap_or_default)
            .map_err(|err| KernelError::Checkpoint(err.to_string()))
    }

    /// Stage the record; it becomes durable with the next store commit.
    pub fn stage(&self, store: &dyn KvStore) -> KernelResult<()> {
        set_json(store, CHECKPOINT_KEY, self)?;
        Ok(())
    }

    /// `sha256:` digest of the stored encoding, for diagnostics.
    pub fn digest(&self) -> KernelResult<String> {
        digest_json(self).map_err(|err| KernelError::Checkpoint(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{chain_send::ChainCall, value::Value};
    use crankshaft_store::MemKvStore;

    #[test]
    fn default_encoding() {
        assert_eq!(
            serde_json::to_string(&Checkpoint::default()).unwrap(),
            "[0,[],[]]"
        );
        let store = MemKvStore::new();
        assert_eq!(Checkpoint::load(&store).unwrap(), Checkpoint::default());
    }

    #[test]
    fn stage_then_load() {
        let store = MemKvStore::new();
        let checkpoint = Checkpoint {
            saved_height: 5,
            saved_actions: vec![BlockAction::begin(5, 50), BlockAction::end(5, 50)],
            saved_chain_sends: vec![ChainSendRecord {
                call: ChainCall::new("storage", Value::text("get")),
                result: Value::Int(1),
            }],
        };
        checkpoint.stage(&store).unwrap();
        store.commit().unwrap();
        let raw = store.committed().remove(CHECKPOINT_KEY).unwrap();
        assert!(raw.starts_with("[5,[{\"type\":\"BEGIN_BLOCK\""), "{raw}");
        assert_eq!(Checkpoint::load(&store).unwrap(), checkpoint);
        assert_eq!(
            checkpoint.digest().unwrap(),
            crankshaft_store::digest_bytes(raw.as_bytes())
        );
    }

    #[test]
    fn malformed_record_is_a_checkpoint_error() {
        let store = MemKvStore::new();
        store.set(CHECKPOINT_KEY, "{\"height\":1}").unwrap();
        assert!(matches!(
            Checkpoint::load(&store),
            Err(KernelError::Checkpoint(_))
        ));
    }
}
