use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use anyhow::{Context, Result};
use crankshaft_host::{ActionPortHandler, BlockManager, HostResult};
use crankshaft_kernel::{
    BlockAction, ChainSender, Checkpoint, DriverConfig, KernelDriver, KernelResult, PrometheusSink,
    devices::PeerMailbox,
};
use crankshaft_store::MemKvStore;

use crate::{chain::RecordingChain, fixtures, mock_kernel::MockKernel};

/// A [`BlockManager`] driving a [`MockKernel`] over in-memory stores.
///
/// The stores and the chain outlive the manager, so [`TestBridge::restart`]
/// can model a crash: a new manager is built over the committed contents
/// only, and the step counter starts from zero.
pub struct TestBridge {
    manager: BlockManager<MockKernel>,
    kernel_store: MemKvStore,
    mailbox_store: MemKvStore,
    chain: RecordingChain,
    config: DriverConfig,
    metrics: PrometheusSink,
    steps: Arc<AtomicU64>,
}

impl TestBridge {
    pub fn new() -> Result<Self> {
        Self::with_config(DriverConfig::default())
    }

    pub fn with_budget(crank_budget: u64) -> Result<Self> {
        Self::with_config(DriverConfig::default().with_crank_budget(crank_budget))
    }

    pub fn with_config(config: DriverConfig) -> Result<Self> {
        Self::from_parts(
            MemKvStore::new(),
            MemKvStore::new(),
            RecordingChain::new(),
            config,
        )
    }

    /// Build a bridge over existing stores, e.g. disk contents captured at
    /// different moments of a crash.
    pub fn from_parts(
        kernel_store: MemKvStore,
        mailbox_store: MemKvStore,
        chain: RecordingChain,
        config: DriverConfig,
    ) -> Result<Self> {
        let steps = Arc::new(AtomicU64::new(0));
        let kernel = MockKernel::load(&kernel_store)
            .context("load mock kernel state")?
            .with_step_counter(steps.clone());
        let metrics = PrometheusSink::new().context("build metrics sink")?;
        let driver = KernelDriver::new(
            kernel,
            Arc::new(kernel_store.clone()),
            Arc::new(mailbox_store.clone()),
            ChainSender::new(chain.clone()),
            config.clone(),
            Arc::new(metrics.clone()),
        )
        .context("build kernel driver")?;
        let manager = BlockManager::new(driver, false).context("restore block manager")?;
        Ok(Self {
            manager,
            kernel_store,
            mailbox_store,
            chain,
            config,
            metrics,
            steps,
        })
    }

    /// Crash and come back: everything not committed is lost.
    pub fn restart(self) -> Result<Self> {
        Self::from_parts(
            self.kernel_store.reopen(),
            self.mailbox_store.reopen(),
            self.chain,
            self.config,
        )
    }

    pub fn apply(&mut self, action: BlockAction) -> HostResult<()> {
        self.manager.apply(action)
    }

    /// Apply in order, stopping at the first failure.
    pub fn apply_all(&mut self, actions: impl IntoIterator<Item = BlockAction>) -> HostResult<()> {
        for action in actions {
            self.manager.apply(action)?;
        }
        Ok(())
    }

    /// A full block: begin, `middle`, end and commit.
    pub fn run_block(
        &mut self,
        height: u64,
        middle: impl IntoIterator<Item = BlockAction>,
    ) -> HostResult<()> {
        self.apply_all(fixtures::block(height, middle))?;
        self.apply(fixtures::commit(height))
    }

    /// Queue genesis work on the kernel.
    pub fn seed(&mut self, units: usize) {
        self.manager.driver_mut().kernel_mut().seed(units);
    }

    /// Cranks run since this bridge was (re)started.
    pub fn steps(&self) -> u64 {
        self.steps.load(Ordering::SeqCst)
    }

    pub fn step_counter(&self) -> Arc<AtomicU64> {
        self.steps.clone()
    }

    pub fn manager(&self) -> &BlockManager<MockKernel> {
        &self.manager
    }

    pub fn manager_mut(&mut self) -> &mut BlockManager<MockKernel> {
        &mut self.manager
    }

    pub fn kernel(&self) -> &MockKernel {
        self.manager.driver().kernel()
    }

    pub fn chain(&self) -> &RecordingChain {
        &self.chain
    }

    pub fn metrics(&self) -> &PrometheusSink {
        &self.metrics
    }

    /// Shared handle on the kernel store ("disk" contents survive the bridge).
    pub fn kernel_store(&self) -> MemKvStore {
        self.kernel_store.clone()
    }

    pub fn mailbox_store(&self) -> MemKvStore {
        self.mailbox_store.clone()
    }

    pub fn checkpoint(&self) -> KernelResult<Checkpoint> {
        self.manager.driver().load_checkpoint()
    }

    pub fn peer(&mut self, peer: &str) -> KernelResult<PeerMailbox> {
        self.manager.driver_mut().mailbox_mut().peer(peer)
    }

    /// Hand the manager to a port handler, e.g. for a `PortBridge`.
    pub fn into_handler(self) -> ActionPortHandler<MockKernel> {
        ActionPortHandler::new(self.manager)
    }
}
