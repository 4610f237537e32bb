use std::sync::Arc;

use crankshaft_kernel::{
    ChainSender, HostChain, Kernel, KernelDriver, KernelResult, NopSink, PrometheusSink,
    SharedSink,
};
use crankshaft_store::{DynKvStore, FsKvStore, KvStore};

use crate::{
    block::BlockManager,
    config::HostConfig,
    error::HostResult,
    port::{ActionPortHandler, PortBridge, PortId},
};

/// Name of the port carrying block actions.
pub const ACTION_PORT_NAME: &str = "block-actions";

/// A running bridge: the port table plus the action port registered on it.
pub struct Launched {
    pub bridge: PortBridge,
    pub port: PortId,
    /// Present unless the Prometheus registry could not be built.
    pub metrics: Option<PrometheusSink>,
}

/// Open the filesystem stores under `config.state_dir`, restore the
/// checkpoint and register the block-action handler on a new port bridge.
///
/// `make_kernel` receives the kernel store so the kernel can load its own
/// state. Must be called from inside a tokio runtime.
pub fn launch<K, F>(
    config: &HostConfig,
    make_kernel: F,
    chain: impl HostChain + 'static,
) -> HostResult<Launched>
where
    K: Kernel + 'static,
    F: FnOnce(&dyn KvStore) -> KernelResult<K>,
{
    config.validate()?;
    let kernel_store: DynKvStore = Arc::new(FsKvStore::open(config.kernel_store_dir())?);
    let mailbox_store: DynKvStore = Arc::new(FsKvStore::open(config.mailbox_store_dir())?);
    let kernel = make_kernel(kernel_store.as_ref())?;

    let metrics = match PrometheusSink::new() {
        Ok(sink) => Some(sink),
        Err(err) => {
            tracing::warn!("prometheus sink unavailable, metrics disabled: {err}");
            None
        }
    };
    let sink: SharedSink = match &metrics {
        Some(sink) => Arc::new(sink.clone()),
        None => Arc::new(NopSink),
    };
    tracing::debug!(sink = ?sink, "metrics sink ready");

    let driver = KernelDriver::new(
        kernel,
        kernel_store,
        mailbox_store,
        ChainSender::new(chain),
        config.driver.clone(),
        sink,
    )?;
    let manager = BlockManager::new(driver, config.verbose_blocks)?;
    tracing::info!(
        state_dir = %config.state_dir.display(),
        crank_budget = config.driver.crank_budget,
        computed_height = manager.computed_height(),
        "bridge launched"
    );

    let mut bridge = PortBridge::new(config.port_queue_capacity);
    let port = bridge.register_handler(ACTION_PORT_NAME, ActionPortHandler::new(manager));
    Ok(Launched {
        bridge,
        port,
        metrics,
    })
}

impl Launched {
    /// Prometheus text exposition of the bridge's metrics, if enabled.
    pub fn render_metrics(&self) -> Option<String> {
        self.metrics.as_ref().map(PrometheusSink::render)
    }
}
