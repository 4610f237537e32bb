//! Port bridge: routes JSON requests from the host process to registered
//! handlers and carries replies (or rejections) back.
//!
//! Each handler runs on its own task and drains its queue one request at a
//! time, so one action fully settles before the next one starts.

use std::collections::BTreeMap;

use async_trait::async_trait;
use crankshaft_kernel::{BlockAction, Kernel};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tokio::{
    runtime::{Handle, RuntimeFlavor},
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::Instrument;

use crate::{
    block::BlockManager,
    error::{HostError, HostResult},
};

/// Request type of the init handshake.
pub const AG_COSMOS_INIT: &str = "AG_COSMOS_INIT";

pub type PortId = u32;

/// Error payload returned to the caller in place of a reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{code}: {message}")]
pub struct PortRejection {
    pub code: String,
    pub message: String,
}

impl PortRejection {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    fn unknown_port(port: PortId) -> Self {
        Self::new("unknown_port", format!("no handler registered for port {port}"))
    }

    fn closed(port: PortId) -> Self {
        Self::new("port_closed", format!("handler for port {port} has stopped"))
    }
}

impl From<HostError> for PortRejection {
    fn from(err: HostError) -> Self {
        Self::new(err.code(), err.to_string())
    }
}

#[async_trait]
pub trait PortHandler: Send + 'static {
    async fn handle(&mut self, body: serde_json::Value) -> Result<serde_json::Value, PortRejection>;

    /// Called once after the last request, when the bridge shuts down.
    async fn shutdown(&mut self) {}
}

type PortReply = Result<serde_json::Value, PortRejection>;

struct PortRequest {
    body: serde_json::Value,
    resp: oneshot::Sender<PortReply>,
}

/// Cloneable sending side of one port, for callers on other tasks.
#[derive(Clone)]
pub struct PortHandle {
    port: PortId,
    tx: mpsc::Sender<PortRequest>,
}

impl PortHandle {
    pub fn port(&self) -> PortId {
        self.port
    }

    pub async fn call(&self, body: serde_json::Value) -> PortReply {
        let (resp, rx) = oneshot::channel();
        self.tx
            .send(PortRequest { body, resp })
            .await
            .map_err(|_| PortRejection::closed(self.port))?;
        rx.await.map_err(|_| PortRejection::closed(self.port))?
    }
}

struct PortEntry {
    name: String,
    handle: PortHandle,
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Owns the handler table. Must be used from inside a tokio runtime.
pub struct PortBridge {
    ports: BTreeMap<PortId, PortEntry>,
    next_id: PortId,
    queue_capacity: usize,
}

impl PortBridge {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            ports: BTreeMap::new(),
            next_id: 1,
            queue_capacity: queue_capacity.max(1),
        }
    }

    pub fn register_handler<H: PortHandler>(
        &mut self,
        name: impl Into<String>,
        handler: H,
    ) -> PortId {
        let port = self.next_id;
        self.next_id += 1;
        let name = name.into();
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let (stop, stop_rx) = oneshot::channel();
        let task = tokio::spawn(serve(port, name.clone(), handler, rx, stop_rx));
        tracing::info!(port, name = %name, "registered port handler");
        self.ports.insert(
            port,
            PortEntry {
                name,
                handle: PortHandle { port, tx },
                stop,
                task,
            },
        );
        port
    }

    pub fn port_name(&self, port: PortId) -> Option<&str> {
        self.ports.get(&port).map(|entry| entry.name.as_str())
    }

    pub fn handle(&self, port: PortId) -> Option<PortHandle> {
        self.ports.get(&port).map(|entry| entry.handle.clone())
    }

    pub async fn dispatch(&self, port: PortId, body: serde_json::Value) -> PortReply {
        let handle = self
            .handle(port)
            .ok_or_else(|| PortRejection::unknown_port(port))?;
        handle.call(body).await
    }

    /// Close every queue and wait for the handlers to drain and stop.
    ///
    /// Requests already queued still get answered. Outstanding
    /// [`PortHandle`] clones are rejected with `port_closed` from then on.
    pub async fn shutdown(self) {
        for (port, entry) in self.ports {
            let PortEntry {
                name,
                handle,
                stop,
                task,
            } = entry;
            drop(handle);
            let _ = stop.send(());
            if let Err(err) = task.await {
                tracing::warn!(port, name = %name, "port handler task failed: {err}");
            }
        }
    }
}

async fn serve<H: PortHandler>(
    port: PortId,
    name: String,
    mut handler: H,
    mut rx: mpsc::Receiver<PortRequest>,
    mut stop: oneshot::Receiver<()>,
) {
    let mut stopping = false;
    loop {
        let request = tokio::select! {
            biased;
            // A dropped bridge counts as a stop request too.
            _ = &mut stop, if !stopping => {
                rx.close();
                stopping = true;
                continue;
            }
            request = rx.recv() => request,
        };
        let Some(PortRequest { body, resp }) = request else {
            break;
        };
        let span = tracing::debug_span!("port_dispatch", port, name = %name);
        let reply = handler.handle(body).instrument(span).await;
        if let Err(rejection) = &reply {
            tracing::warn!(port, code = %rejection.code, "request rejected: {}", rejection.message);
        }
        if resp.send(reply).is_err() {
            tracing::debug!(port, "caller dropped before the reply was ready");
        }
    }
    handler.shutdown().await;
    tracing::debug!(port, name = %name, "port handler stopped");
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitRequest {
    block_height: u64,
    #[serde(default)]
    block_time: u64,
    /// Run genesis work when the bridge has never executed a block.
    #[serde(default)]
    bootstrap: bool,
}

/// Port handler feeding block actions to a [`BlockManager`], and answering
/// the `AG_COSMOS_INIT` handshake.
pub struct ActionPortHandler<K> {
    manager: BlockManager<K>,
}

impl<K: Kernel> ActionPortHandler<K> {
    pub fn new(manager: BlockManager<K>) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &BlockManager<K> {
        &self.manager
    }

    pub fn handle_request(&mut self, body: serde_json::Value) -> HostResult<serde_json::Value> {
        let kind = body
            .get("type")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| HostError::InvalidAction("request has no string `type`".into()))?;

        if kind == AG_COSMOS_INIT {
            let init: InitRequest = serde_json::from_value(body)
                .map_err(|err| HostError::InvalidAction(format!("{AG_COSMOS_INIT}: {err}")))?;
            return self.init(init);
        }

        let kind = kind.to_string();
        let action: BlockAction = serde_json::from_value(body).map_err(|err| {
            tracing::warn!(kind = %kind, "undecodable inbound action");
            HostError::InvalidAction(format!("{kind}: {err}"))
        })?;
        self.manager.apply(action)?;
        Ok(serde_json::Value::Null)
    }

    fn init(&mut self, init: InitRequest) -> HostResult<serde_json::Value> {
        let needs_execution = self.manager.needs_execution(init.block_height)?;
        if init.bootstrap && needs_execution && self.manager.saved_height() == 0 {
            self.manager.bootstrap(init.block_height, init.block_time)?;
        }
        tracing::info!(
            block_height = init.block_height,
            saved_height = self.manager.saved_height(),
            computed_height = self.manager.computed_height(),
            needs_execution,
            "init handshake"
        );
        Ok(json!({
            "savedHeight": self.manager.saved_height(),
            "computedHeight": self.manager.computed_height(),
            "needsExecution": needs_execution,
        }))
    }
}

#[async_trait]
impl<K: Kernel + 'static> PortHandler for ActionPortHandler<K> {
    async fn handle(&mut self, body: serde_json::Value) -> Result<serde_json::Value, PortRejection> {
        // Cranks are synchronous and can be long; keep them off the shared
        // worker where the runtime allows it.
        let multi_thread = Handle::try_current()
            .map(|handle| handle.runtime_flavor() == RuntimeFlavor::MultiThread)
            .unwrap_or(false);
        let result = if multi_thread {
            tokio::task::block_in_place(|| self.handle_request(body))
        } else {
            self.handle_request(body)
        };
        result.map_err(PortRejection::from)
    }

    async fn shutdown(&mut self) {
        if let Err(err) = self.manager.shutdown() {
            tracing::warn!("closing stores failed: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        sync::{
            Arc,
            atomic::{AtomicBool, AtomicUsize, Ordering},
        },
        time::Duration,
    };

    /// Echoes the body back, rejects `{"fail": ..}` and checks that no two
    /// requests overlap.
    struct EchoHandler {
        busy: Arc<AtomicBool>,
        seen: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl PortHandler for EchoHandler {
        async fn handle(
            &mut self,
            body: serde_json::Value,
        ) -> Result<serde_json::Value, PortRejection> {
            assert!(!self.busy.swap(true, Ordering::SeqCst), "overlapping requests");
            tokio::time::sleep(Duration::from_millis(1)).await;
            self.busy.store(false, Ordering::SeqCst);
            let index = self.seen.fetch_add(1, Ordering::SeqCst);
            if let Some(reason) = body.get("fail") {
                return Err(PortRejection::new("handler_error", reason.to_string()));
            }
            Ok(json!({"index": index, "body": body}))
        }
    }

    fn echo() -> EchoHandler {
        EchoHandler {
            busy: Arc::new(AtomicBool::new(false)),
            seen: Arc::new(AtomicUsize::new(0)),
        }
    }

    #[tokio::test]
    async fn dispatch_round_trip() {
        let mut bridge = PortBridge::new(4);
        let port = bridge.register_handler("echo", echo());
        assert_eq!(bridge.port_name(port), Some("echo"));

        let reply = bridge.dispatch(port, json!({"n": 1})).await.unwrap();
        assert_eq!(reply, json!({"index": 0, "body": {"n": 1}}));
        bridge.shutdown().await;
    }

    #[tokio::test]
    async fn handler_errors_become_rejections() {
        let mut bridge = PortBridge::new(4);
        let port = bridge.register_handler("echo", echo());
        let rejection = bridge
            .dispatch(port, json!({"fail": "nope"}))
            .await
            .unwrap_err();
        assert_eq!(rejection.code, "handler_error");
        assert_eq!(
            serde_json::to_value(&rejection).unwrap(),
            json!({"code": "handler_error", "message": "\"nope\""})
        );
    }

    #[tokio::test]
    async fn unknown_port_is_rejected() {
        let bridge = PortBridge::new(4);
        let rejection = bridge.dispatch(42, json!(null)).await.unwrap_err();
        assert_eq!(rejection.code, "unknown_port");
    }

    #[tokio::test]
    async fn concurrent_callers_are_serialized() {
        let mut bridge = PortBridge::new(2);
        let port = bridge.register_handler("echo", echo());
        let handle = bridge.handle(port).unwrap();

        let mut tasks = Vec::new();
        for n in 0..8 {
            let handle = handle.clone();
            tasks.push(tokio::spawn(async move { handle.call(json!({"n": n})).await }));
        }
        let mut indices = Vec::new();
        for task in tasks {
            let reply = task.await.unwrap().unwrap();
            indices.push(reply["index"].as_u64().unwrap());
        }
        indices.sort_unstable();
        assert_eq!(indices, (0..8).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn shutdown_completes_while_handles_are_held() {
        let mut bridge = PortBridge::new(4);
        let port = bridge.register_handler("echo", echo());
        let held = bridge.handle(port).unwrap();
        held.call(json!({"n": 0})).await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), bridge.shutdown())
            .await
            .expect("shutdown waited on an outstanding handle");
        let rejection = held.call(json!({"n": 1})).await.unwrap_err();
        assert_eq!(rejection.code, "port_closed");
    }

    #[tokio::test]
    async fn sequential_dispatch_keeps_order() {
        let mut bridge = PortBridge::new(4);
        let port = bridge.register_handler("echo", echo());
        for n in 0..5u64 {
            let reply = bridge.dispatch(port, json!({"n": n})).await.unwrap();
            assert_eq!(reply["index"], json!(n));
            assert_eq!(reply["body"]["n"], json!(n));
        }
    }
}
