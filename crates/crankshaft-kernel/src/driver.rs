//! Drives one kernel through block boundaries: feeds it inbound work, runs a
//! bounded number of cranks per block and persists the checkpoint together
//! with kernel state.

use std::time::{Duration, Instant};

use crankshaft_store::DynKvStore;

use crate::{
    action::{BlockAction, BridgeSource},
    chain_send::{ChainSendRecord, ChainSender, ReplayMode},
    checkpoint::Checkpoint,
    config::DriverConfig,
    devices::{BridgeDevice, DeviceIo, MailboxDevice, TimerDevice},
    error::KernelResult,
    kernel::{Kernel, KernelInput, StepOutcome},
    metrics::{SharedSink, StatsMirror},
    value::Value,
};

/// Result of one crank loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndBlockSummary {
    pub cranks: u64,
    /// True when the kernel ran out of work before the budget did.
    pub idle: bool,
    pub elapsed: Duration,
}

pub struct KernelDriver<K> {
    kernel: K,
    store: DynKvStore,
    mailbox: MailboxDevice,
    timer: TimerDevice,
    bridge: BridgeDevice,
    config: DriverConfig,
    sink: SharedSink,
    stats: StatsMirror,
}

impl<K: Kernel> KernelDriver<K> {
    pub fn new(
        kernel: K,
        kernel_store: DynKvStore,
        mailbox_store: DynKvStore,
        sender: ChainSender,
        config: DriverConfig,
        sink: SharedSink,
    ) -> KernelResult<Self> {
        config.validate()?;
        let timer = TimerDevice::load(kernel_store.as_ref())?;
        let stats = StatsMirror::new(&config.expected_stats);
        Ok(Self {
            kernel,
            store: kernel_store.clone(),
            mailbox: MailboxDevice::new(mailbox_store, kernel_store.clone()),
            timer,
            bridge: BridgeDevice::new(sender),
            config,
            sink,
            stats,
        })
    }

    pub fn kernel(&self) -> &K {
        &self.kernel
    }

    pub fn kernel_mut(&mut self) -> &mut K {
        &mut self.kernel
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn sink(&self) -> &SharedSink {
        &self.sink
    }

    pub fn mailbox_mut(&mut self) -> &mut MailboxDevice {
        &mut self.mailbox
    }

    pub fn timer(&self) -> &TimerDevice {
        &self.timer
    }

    /// Advance the timer device to `time`, enqueueing every due timer.
    /// Returns whether anything was enqueued.
    pub fn begin_block(&mut self, height: u64, time: u64) -> KernelResult<bool> {
        self.poll_timers(height, time)
    }

    fn poll_timers(&mut self, height: u64, time: u64) -> KernelResult<bool> {
        let due = self.timer.poll(time);
        let fired = !due.is_empty();
        for (handle, deadline) in due {
            log::debug!("block {height}: timer {handle} (deadline {deadline}) fired");
            self.kernel.push_input(KernelInput::Timer {
                handle,
                fired_at: time,
            })?;
        }
        Ok(fired)
    }

    /// Hand new mailbox messages from `peer` to the kernel. Duplicates are
    /// dropped. Returns whether anything new was enqueued.
    pub fn deliver_inbound(
        &mut self,
        peer: &str,
        messages: &[(u64, String)],
        ack: u64,
        height: u64,
        time: u64,
    ) -> KernelResult<bool> {
        let fresh = self.mailbox.deliver(peer, messages, ack)?;
        log::debug!(
            "block {height} @ {time}: {} of {} messages from {peer} are new",
            fresh.len(),
            messages.len()
        );
        let delivered = !fresh.is_empty();
        for (seq, body) in fresh {
            self.kernel.push_input(KernelInput::Mailbox {
                peer: peer.to_string(),
                seq,
                body,
            })?;
        }
        Ok(delivered)
    }

    pub fn do_bridge_inbound(&mut self, source: BridgeSource, body: Value) -> KernelResult<()> {
        let input = self.bridge.inbound(source, body);
        self.kernel.push_input(input)
    }

    /// Run at most `crank_budget` cranks. Leftover work carries over.
    pub fn end_block(&mut self, height: u64, time: u64) -> KernelResult<EndBlockSummary> {
        let summary = self.crank_loop(Some(self.config.crank_budget))?;
        self.sink
            .observe_block_seconds(summary.elapsed.as_secs_f64());
        self.mirror_stats();
        log::debug!(
            "block {height} @ {time}: {} cranks in {:?}{}",
            summary.cranks,
            summary.elapsed,
            if summary.idle { "" } else { " (budget exhausted)" }
        );
        Ok(summary)
    }

    /// Genesis work: poll timers and run until the kernel is idle, unbounded.
    pub fn bootstrap_block(&mut self, time: u64) -> KernelResult<EndBlockSummary> {
        self.poll_timers(0, time)?;
        let summary = self.crank_loop(None)?;
        self.mirror_stats();
        log::info!("bootstrap block ran {} cranks", summary.cranks);
        Ok(summary)
    }

    fn crank_loop(&mut self, budget: Option<u64>) -> KernelResult<EndBlockSummary> {
        let started = Instant::now();
        let mut cranks = 0u64;
        let idle = loop {
            if budget.is_some_and(|limit| cranks >= limit) {
                break false;
            }
            let crank_started = Instant::now();
            let mut io = DeviceIo::new(&self.bridge, &mut self.mailbox, &mut self.timer);
            match self.kernel.step(&mut io)? {
                StepOutcome::Idle => break true,
                StepOutcome::Ran => {
                    cranks += 1;
                    self.sink
                        .observe_crank_seconds(crank_started.elapsed().as_secs_f64());
                }
            }
        };
        Ok(EndBlockSummary {
            cranks,
            idle,
            elapsed: started.elapsed(),
        })
    }

    fn mirror_stats(&mut self) {
        let stats = self.kernel.stats();
        self.stats.mirror(&stats, self.sink.as_ref());
    }

    /// Publish mailbox state to the mailbox store. The kernel store copy is
    /// only staged; it commits with the next `save_outside_state`.
    pub fn save_chain_state(&mut self) -> KernelResult<()> {
        self.mailbox.save()
    }

    /// Stage kernel state, timer state and the checkpoint record, then commit
    /// the kernel store once so they land together with the mailbox records
    /// staged by `save_chain_state`.
    pub fn save_outside_state(
        &mut self,
        height: u64,
        actions: &[BlockAction],
        chain_sends: Vec<ChainSendRecord>,
    ) -> KernelResult<Checkpoint> {
        let checkpoint = Checkpoint {
            saved_height: height,
            saved_actions: actions.to_vec(),
            saved_chain_sends: chain_sends,
        };
        self.kernel.persist(self.store.as_ref())?;
        self.timer.stage(self.store.as_ref())?;
        checkpoint.stage(self.store.as_ref())?;
        self.store.commit()?;
        log::debug!("checkpoint {height} saved ({})", checkpoint.digest()?);
        Ok(checkpoint)
    }

    pub fn load_checkpoint(&self) -> KernelResult<Checkpoint> {
        Checkpoint::load(self.store.as_ref())
    }

    pub fn restore_chain_sends(&self, records: Vec<ChainSendRecord>) {
        self.bridge.sender().restore(records);
    }

    pub fn replay_chain_sends(&self, mode: ReplayMode) -> KernelResult<usize> {
        Ok(self.bridge.sender().replay(mode)?)
    }

    /// Chain sends recorded since the last flush.
    pub fn chain_sends(&self) -> Vec<ChainSendRecord> {
        self.bridge.sender().records()
    }

    pub fn shutdown(&mut self) -> KernelResult<()> {
        self.mailbox.close()?;
        self.store.close()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        chain_send::{ChainCall, ChainError, HostChain},
        error::KernelError,
        metrics::{NopSink, PrometheusSink},
    };
    use crankshaft_store::{KvStore, MemKvStore, StoreError};
    use std::{
        collections::{BTreeMap, VecDeque},
        sync::Arc,
    };

    /// Kernel with one unit of work per input. Bridge inputs call the chain,
    /// mailbox bodies of `"sleep"` set a timer ten seconds out and `"reply"`
    /// answers the sender.
    #[derive(Default)]
    struct QueueKernel {
        queue: VecDeque<KernelInput>,
        cranks: u64,
    }

    impl QueueKernel {
        fn with_pending(units: u64) -> Self {
            let mut kernel = Self::default();
            for handle in 0..units {
                kernel.queue.push_back(KernelInput::Timer {
                    handle,
                    fired_at: 0,
                });
            }
            kernel
        }
    }

    impl Kernel for QueueKernel {
        fn push_input(&mut self, input: KernelInput) -> KernelResult<()> {
            self.queue.push_back(input);
            Ok(())
        }

        fn step(&mut self, io: &mut DeviceIo<'_>) -> KernelResult<StepOutcome> {
            let Some(input) = self.queue.pop_front() else {
                return Ok(StepOutcome::Idle);
            };
            self.cranks += 1;
            match input {
                KernelInput::Bridge { body, .. } => {
                    io.bridge_send("storage", body)?;
                }
                KernelInput::Mailbox { peer, body, .. } if body == "reply" => {
                    io.mailbox_send(&peer, "ack")?;
                }
                KernelInput::Mailbox { body, .. } if body == "sleep" => {
                    let deadline = io.now() + 10;
                    io.set_timer(deadline);
                }
                KernelInput::Mailbox { body, .. } if body == "fail" => {
                    return Err(KernelError::Step("requested failure".into()));
                }
                _ => {}
            }
            Ok(StepOutcome::Ran)
        }

        fn stats(&self) -> BTreeMap<String, u64> {
            BTreeMap::from([("cranks".to_string(), self.cranks)])
        }

        fn persist(&mut self, store: &dyn KvStore) -> KernelResult<()> {
            store.set("kernel.cranks", &self.cranks.to_string())?;
            Ok(())
        }
    }

    struct EchoChain;

    impl HostChain for EchoChain {
        fn send(&mut self, call: &ChainCall) -> Result<Value, ChainError> {
            Ok(call.message.clone())
        }
    }

    struct Harness {
        driver: KernelDriver<QueueKernel>,
        kernel_store: MemKvStore,
        mailbox_store: MemKvStore,
    }

    fn harness(kernel: QueueKernel, budget: u64) -> Harness {
        let kernel_store = MemKvStore::new();
        let mailbox_store = MemKvStore::new();
        let driver = KernelDriver::new(
            kernel,
            Arc::new(kernel_store.clone()),
            Arc::new(mailbox_store.clone()),
            ChainSender::new(EchoChain),
            DriverConfig::default().with_crank_budget(budget),
            Arc::new(NopSink),
        )
        .unwrap();
        Harness {
            driver,
            kernel_store,
            mailbox_store,
        }
    }

    #[test]
    fn budget_bounds_cranks_and_work_carries_over() {
        let mut h = harness(QueueKernel::with_pending(5), 3);
        let first = h.driver.end_block(1, 10).unwrap();
        assert_eq!(first.cranks, 3);
        assert!(!first.idle);
        let second = h.driver.end_block(2, 20).unwrap();
        assert_eq!(second.cranks, 2);
        assert!(second.idle);
        assert_eq!(h.driver.kernel().cranks, 5);
    }

    #[test]
    fn duplicate_delivery_reaches_kernel_once() {
        let mut h = harness(QueueKernel::default(), 10);
        let messages = vec![(1, "hello".to_string())];
        assert!(h.driver.deliver_inbound("p", &messages, 0, 1, 10).unwrap());
        assert!(!h.driver.deliver_inbound("p", &messages, 0, 1, 10).unwrap());
        assert_eq!(h.driver.end_block(1, 10).unwrap().cranks, 1);
    }

    #[test]
    fn timers_fire_at_block_begin() {
        let mut h = harness(QueueKernel::default(), 10);
        assert!(!h.driver.begin_block(1, 100).unwrap());
        h.driver
            .deliver_inbound("p", &[(1, "sleep".into())], 0, 1, 100)
            .unwrap();
        h.driver.end_block(1, 100).unwrap();
        assert!(!h.driver.begin_block(2, 105).unwrap());
        assert!(h.driver.begin_block(3, 110).unwrap());
        assert_eq!(h.driver.end_block(3, 110).unwrap().cranks, 1);
    }

    #[test]
    fn bridge_sends_are_logged_and_replayable() {
        let mut h = harness(QueueKernel::default(), 10);
        h.driver
            .do_bridge_inbound(BridgeSource::Dibc, Value::text("packet"))
            .unwrap();
        h.driver.end_block(1, 10).unwrap();
        let sends = h.driver.chain_sends();
        assert_eq!(sends.len(), 1);
        assert_eq!(sends[0].result, Value::text("packet"));
        assert_eq!(h.driver.replay_chain_sends(ReplayMode::Assert).unwrap(), 1);
        assert_eq!(h.driver.replay_chain_sends(ReplayMode::Discard).unwrap(), 1);
        assert!(h.driver.chain_sends().is_empty());
    }

    #[test]
    fn save_outside_state_commits_one_transaction() {
        let mut h = harness(QueueKernel::default(), 10);
        h.driver
            .deliver_inbound("p", &[(1, "reply".into())], 0, 1, 10)
            .unwrap();
        h.driver.end_block(1, 10).unwrap();
        h.driver.save_chain_state().unwrap();
        let actions = vec![BlockAction::begin(1, 10), BlockAction::end(1, 10)];
        let sends = h.driver.chain_sends();
        let saved = h.driver.save_outside_state(1, &actions, sends).unwrap();

        let committed = h.kernel_store.committed();
        assert_eq!(committed.get("kernel.cranks").map(String::as_str), Some("1"));
        assert!(committed.contains_key("device.timer"));
        assert_eq!(h.driver.load_checkpoint().unwrap(), saved);
        assert_eq!(
            Checkpoint::load(&h.kernel_store.reopen()).unwrap().saved_height,
            1
        );

        let mailbox = h.mailbox_store.committed();
        let peer: serde_json::Value = serde_json::from_str(&mailbox["mailbox.p"]).unwrap();
        assert_eq!(peer["outbound"], serde_json::json!([[1, "ack"]]));
        assert_eq!(committed.get("mailbox.p"), mailbox.get("mailbox.p"));
    }

    #[test]
    fn mailbox_dedup_waits_for_the_checkpoint() {
        let mut h = harness(QueueKernel::default(), 10);
        let messages = vec![(1, "hello".to_string())];
        h.driver.deliver_inbound("p", &messages, 0, 1, 10).unwrap();
        h.driver.end_block(1, 10).unwrap();
        h.driver.save_chain_state().unwrap();
        assert!(h.mailbox_store.committed().contains_key("mailbox.p"));
        assert!(!h.kernel_store.committed().contains_key("mailbox.p"));

        // Crash before the checkpoint commit: the message is accepted again.
        let mut restarted = KernelDriver::new(
            QueueKernel::default(),
            Arc::new(h.kernel_store.reopen()),
            Arc::new(h.mailbox_store.reopen()),
            ChainSender::new(EchoChain),
            DriverConfig::default(),
            Arc::new(NopSink),
        )
        .unwrap();
        assert!(restarted.deliver_inbound("p", &messages, 0, 1, 10).unwrap());
    }

    #[test]
    fn kernel_errors_propagate() {
        let mut h = harness(QueueKernel::default(), 10);
        h.driver
            .deliver_inbound("p", &[(1, "fail".into())], 0, 1, 10)
            .unwrap();
        assert!(matches!(
            h.driver.end_block(1, 10),
            Err(KernelError::Step(_))
        ));
    }

    #[test]
    fn bootstrap_ignores_budget() {
        let mut h = harness(QueueKernel::with_pending(7), 2);
        let summary = h.driver.bootstrap_block(0).unwrap();
        assert_eq!(summary.cranks, 7);
        assert!(summary.idle);
    }

    #[test]
    fn shutdown_closes_stores() {
        let mut h = harness(QueueKernel::default(), 1);
        h.driver.shutdown().unwrap();
        assert!(matches!(
            h.kernel_store.get("x"),
            Err(StoreError::Closed)
        ));
        assert!(h.mailbox_store.has("x").is_err());
    }

    #[test]
    fn zero_budget_is_rejected() {
        let result = KernelDriver::new(
            QueueKernel::default(),
            Arc::new(MemKvStore::new()),
            Arc::new(MemKvStore::new()),
            ChainSender::new(EchoChain),
            DriverConfig::default().with_crank_budget(0),
            Arc::new(NopSink),
        );
        assert!(matches!(result, Err(KernelError::Config(_))));
    }

    #[test]
    fn metrics_reach_the_sink() {
        let sink = Arc::new(PrometheusSink::new().unwrap());
        let mut driver = KernelDriver::new(
            QueueKernel::with_pending(2),
            Arc::new(MemKvStore::new()),
            Arc::new(MemKvStore::new()),
            ChainSender::new(EchoChain),
            DriverConfig::default(),
            sink.clone(),
        )
        .unwrap();
        driver.end_block(1, 1).unwrap();
        let text = sink.render();
        assert!(text.contains("crankshaft_crank_seconds_count 2"), "{text}");
        assert!(text.contains("crankshaft_kernel_stat{name=\"cranks\"} 2"));
    }
}
