//! Block-action state machine.
//!
//! Consensus delivers actions strictly in order. Actions of the open block are
//! buffered until `END_BLOCK`, which either replays the pinned chain sends of
//! an already computed height or executes the buffered actions against the
//! kernel and checkpoints the result. `COMMIT_BLOCK` drops the send log.
//!
//! Any consistency violation latches a [`DecoherenceError`]; from then on
//! every call fails with that same error until the process restarts from the
//! last checkpoint.

use std::time::{Duration, Instant};

use crankshaft_kernel::{
    BlockAction, Kernel, KernelDriver, KernelResult, ReplayMode, deep_equal_actions,
};

use crate::error::{DecoherenceError, DecoherenceKind, HostError, HostResult};

/// Per-block phase durations, reset at `BEGIN_BLOCK`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockTimings {
    pub run: Duration,
    pub chain_save: Duration,
    pub outside_save: Duration,
    pub commit: Duration,
}

pub struct BlockManager<K> {
    driver: KernelDriver<K>,
    current_actions: Vec<BlockAction>,
    saved_actions: Vec<BlockAction>,
    saved_height: u64,
    computed_height: u64,
    decohered: Option<DecoherenceError>,
    bootstrapped: bool,
    verbose_blocks: bool,
    timings: BlockTimings,
    block_started: Option<Instant>,
}

impl<K: Kernel> BlockManager<K> {
    /// Restore from the driver's checkpoint. The saved chain sends go back
    /// into the send log so a re-delivered block can be replayed.
    pub fn new(driver: KernelDriver<K>, verbose_blocks: bool) -> HostResult<Self> {
        let checkpoint = driver.load_checkpoint()?;
        tracing::info!(
            saved_height = checkpoint.saved_height,
            saved_actions = checkpoint.saved_actions.len(),
            saved_chain_sends = checkpoint.saved_chain_sends.len(),
            digest = %checkpoint.digest()?,
            "restored checkpoint"
        );
        driver.restore_chain_sends(checkpoint.saved_chain_sends);
        Ok(Self {
            driver,
            current_actions: Vec::new(),
            saved_actions: checkpoint.saved_actions,
            saved_height: checkpoint.saved_height,
            computed_height: checkpoint.saved_height,
            decohered: None,
            bootstrapped: false,
            verbose_blocks,
            timings: BlockTimings::default(),
            block_started: None,
        })
    }

    pub fn saved_height(&self) -> u64 {
        self.saved_height
    }

    pub fn computed_height(&self) -> u64 {
        self.computed_height
    }

    pub fn saved_actions(&self) -> &[BlockAction] {
        &self.saved_actions
    }

    pub fn current_actions(&self) -> &[BlockAction] {
        &self.current_actions
    }

    pub fn decoherence(&self) -> Option<&DecoherenceError> {
        self.decohered.as_ref()
    }

    pub fn timings(&self) -> BlockTimings {
        self.timings
    }

    pub fn driver(&self) -> &KernelDriver<K> {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut KernelDriver<K> {
        &mut self.driver
    }

    fn check_coherent(&self) -> HostResult<()> {
        match &self.decohered {
            Some(err) => Err(HostError::Decohered(err.clone())),
            None => Ok(()),
        }
    }

    fn decohere(&mut self, kind: DecoherenceKind, message: impl Into<String>) -> HostError {
        let err = DecoherenceError {
            kind,
            message: message.into(),
        };
        tracing::error!(
            computed_height = self.computed_height,
            saved_height = self.saved_height,
            "bridge decohered: {err}"
        );
        self.decohered = Some(err.clone());
        HostError::Decohered(err)
    }

    pub fn apply(&mut self, action: BlockAction) -> HostResult<()> {
        self.check_coherent()?;
        match action {
            BlockAction::BeginBlock(info) => {
                self.begin_block(action, info.block_height, info.block_time);
                Ok(())
            }
            BlockAction::DeliverInbound(_)
            | BlockAction::IbcEvent(_)
            | BlockAction::PleaseProvision(_) => {
                self.current_actions.push(action);
                Ok(())
            }
            BlockAction::EndBlock(info) => {
                self.current_actions.push(action);
                self.end_block(info.block_height)
            }
            BlockAction::CommitBlock(info) => self.commit_block(info.block_height),
        }
    }

    fn begin_block(&mut self, action: BlockAction, height: u64, time: u64) {
        for leftover in &self.current_actions {
            if leftover.height() != height {
                tracing::warn!(
                    height,
                    leftover_height = leftover.height(),
                    kind = leftover.kind(),
                    "discarding action left over from an interrupted block"
                );
            }
        }
        if self.verbose_blocks {
            tracing::info!(height, time, "begin block");
        } else {
            tracing::debug!(height, time, "begin block");
        }
        self.current_actions = vec![action];
        self.timings = BlockTimings::default();
        self.block_started = Some(Instant::now());
    }

    fn end_block(&mut self, height: u64) -> HostResult<()> {
        let _span = tracing::info_span!("end_block", height).entered();

        let same_actions = deep_equal_actions(&self.current_actions, &self.saved_actions);
        if !same_actions
            && self.computed_height != 0
            && height.checked_sub(1) != Some(self.computed_height)
        {
            let message = format!(
                "actions for height {height} differ from the saved actions of height {}; \
                 computed height is {}",
                self.saved_height, self.computed_height
            );
            return Err(self.decohere(DecoherenceKind::NonTrivialReset, message));
        }

        if self.computed_height == height {
            return self.reevaluate(height);
        }

        let started = Instant::now();
        if let Err(err) = self.execute_fresh(height) {
            let message = format!("executing block {height} failed: {err}");
            return Err(self.decohere(DecoherenceKind::KernelFailure, message));
        }
        self.timings.run = started
            .elapsed()
            .saturating_sub(self.timings.chain_save + self.timings.outside_save);
        tracing::debug!(
            height,
            run_ms = self.timings.run.as_millis() as u64,
            "block executed"
        );
        Ok(())
    }

    /// The height was already computed: pin every chain send instead of
    /// running the kernel again.
    fn reevaluate(&mut self, height: u64) -> HostResult<()> {
        match self.driver.replay_chain_sends(ReplayMode::Assert) {
            Ok(replayed) => {
                tracing::info!(height, replayed, "re-evaluated block by replaying chain sends");
                self.current_actions.clear();
                Ok(())
            }
            Err(err) => {
                let message = format!("replaying block {height}: {err}");
                Err(self.decohere(DecoherenceKind::ReplayMismatch, message))
            }
        }
    }

    fn execute_fresh(&mut self, height: u64) -> KernelResult<()> {
        // Records left from a block consensus never committed through us.
        let stale = self.driver.replay_chain_sends(ReplayMode::Discard)?;
        if stale > 0 {
            tracing::warn!(height, stale, "discarding uncommitted chain sends");
        }

        for action in &self.current_actions {
            self.driver.sink().inc_inbound_action(action.kind());
            let action_started = Instant::now();
            match action {
                BlockAction::BeginBlock(info) => {
                    self.driver.begin_block(info.block_height, info.block_time)?;
                }
                BlockAction::DeliverInbound(delivery) => {
                    self.driver.deliver_inbound(
                        &delivery.peer,
                        &delivery.messages,
                        delivery.ack,
                        delivery.block_height,
                        delivery.block_time,
                    )?;
                }
                BlockAction::IbcEvent(event) | BlockAction::PleaseProvision(event) => {
                    if let Some(source) = action.bridge_source() {
                        self.driver.do_bridge_inbound(source, event.body.clone())?;
                    }
                }
                BlockAction::EndBlock(info) => {
                    let summary = self.driver.end_block(info.block_height, info.block_time)?;
                    if !summary.idle {
                        tracing::debug!(height, cranks = summary.cranks, "crank budget exhausted");
                    }
                }
                BlockAction::CommitBlock(_) => {}
            }
            tracing::trace!(
                kind = action.kind(),
                elapsed_us = action_started.elapsed().as_micros() as u64,
                "action executed"
            );
        }

        let chain_save_started = Instant::now();
        self.driver.save_chain_state()?;
        self.timings.chain_save = chain_save_started.elapsed();

        let outside_save_started = Instant::now();
        let chain_sends = self.driver.chain_sends();
        self.driver
            .save_outside_state(height, &self.current_actions, chain_sends)?;
        self.timings.outside_save = outside_save_started.elapsed();

        self.saved_actions = std::mem::take(&mut self.current_actions);
        self.saved_height = height;
        self.computed_height = height;
        Ok(())
    }

    fn commit_block(&mut self, height: u64) -> HostResult<()> {
        if height != self.computed_height {
            return Err(HostError::CommitHeightMismatch {
                committed: height,
                computed: self.computed_height,
            });
        }
        let started = Instant::now();
        let flushed = self.driver.replay_chain_sends(ReplayMode::Discard)?;
        self.timings.commit = started.elapsed();
        self.record_timings();

        if self.verbose_blocks {
            tracing::info!(
                height,
                flushed,
                run_ms = self.timings.run.as_millis() as u64,
                chain_save_ms = self.timings.chain_save.as_millis() as u64,
                outside_save_ms = self.timings.outside_save.as_millis() as u64,
                "committed block"
            );
        } else {
            tracing::debug!(height, flushed, "committed block");
        }
        Ok(())
    }

    fn record_timings(&self) {
        let sink = self.driver.sink();
        sink.observe_phase_seconds("run", self.timings.run.as_secs_f64());
        sink.observe_phase_seconds("chain_save", self.timings.chain_save.as_secs_f64());
        sink.observe_phase_seconds("outside_save", self.timings.outside_save.as_secs_f64());
        sink.observe_phase_seconds("commit", self.timings.commit.as_secs_f64());
        if let Some(started) = self.block_started {
            sink.observe_phase_seconds("block", started.elapsed().as_secs_f64());
        }
    }

    /// Init handshake: whether `height` still has to be executed here.
    pub fn needs_execution(&mut self, height: u64) -> HostResult<bool> {
        self.check_coherent()?;
        if self.computed_height == 0 || height == self.computed_height + 1 {
            return Ok(true);
        }
        if height == self.computed_height {
            return Ok(false);
        }
        let message = format!(
            "consensus is at height {height} but the bridge computed {}",
            self.computed_height
        );
        Err(self.decohere(DecoherenceKind::NonTrivialReset, message))
    }

    /// Run genesis work to completion before the first block. Only legal on
    /// a bridge that has never executed a block.
    pub fn bootstrap(&mut self, height: u64, time: u64) -> HostResult<()> {
        self.check_coherent()?;
        if self.bootstrapped {
            return Err(HostError::Bootstrap("bootstrap already ran".into()));
        }
        if self.saved_height != 0 || self.computed_height != 0 {
            return Err(HostError::Bootstrap(format!(
                "bridge already at height {} (saved {})",
                self.computed_height, self.saved_height
            )));
        }
        let _span = tracing::info_span!("bootstrap", height).entered();
        let result = self.driver.bootstrap_block(time).and_then(|summary| {
            self.driver.save_chain_state()?;
            let chain_sends = self.driver.chain_sends();
            self.driver
                .save_outside_state(self.saved_height, &self.saved_actions, chain_sends)?;
            Ok(summary)
        });
        match result {
            Ok(summary) => {
                self.bootstrapped = true;
                tracing::info!(cranks = summary.cranks, "bootstrap complete");
                Ok(())
            }
            Err(err) => {
                let message = format!("bootstrap at height {height} failed: {err}");
                Err(self.decohere(DecoherenceKind::KernelFailure, message))
            }
        }
    }

    pub fn shutdown(&mut self) -> HostResult<()> {
        tracing::info!(computed_height = self.computed_height, "shutting down");
        self.driver.shutdown()?;
        Ok(())
    }
}
