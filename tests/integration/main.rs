//! txmule integration test harness.
//!
//! Every test builds a small mesh on the in-process loopback hub: one or
//! more senders, a gateway, and a scripted node standing in for bitcoind.
//! Nothing touches the network.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};

use txmule_core::{NetworkKind, PayloadEncoding, Segment};
use txmule_services::{
    ConfirmationSource, ConfirmationTracker, Gateway, Gid, InboundMessage, LoopbackHub,
    PayloadSink, RetryPolicy, SegmentSender, SegmentStore, TxSubmitter,
};

mod data;
mod failures;
mod transactions;

// ── Harness ───────────────────────────────────────────────────────────────────

pub const SENDER_GID: Gid = 0x0000_1111_2222;
pub const GATEWAY_GID: Gid = 0x0000_3333_4444;

/// Scripted bitcoind: records submissions, answers depth queries.
#[derive(Default)]
pub struct MockNode {
    submitted: Mutex<Vec<(String, NetworkKind)>>,
    depth: Mutex<HashMap<String, u64>>,
    /// Hash that lands in the mempool on the next submit.
    pending_hash: Mutex<Option<String>>,
}

impl MockNode {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The next submitted transaction has this hash.
    pub fn expect_hash(&self, tx_hash: &str) {
        *self.pending_hash.lock().unwrap() = Some(tx_hash.to_string());
    }

    pub fn mine(&self, tx_hash: &str, depth: u64) {
        self.depth.lock().unwrap().insert(tx_hash.to_string(), depth);
    }

    pub fn submissions(&self) -> Vec<(String, NetworkKind)> {
        self.submitted.lock().unwrap().clone()
    }
}

#[async_trait]
impl TxSubmitter for MockNode {
    async fn submit(&self, raw_tx: &str, network: NetworkKind) -> Result<String> {
        self.submitted
            .lock()
            .unwrap()
            .push((raw_tx.to_string(), network));
        let Some(hash) = self.pending_hash.lock().unwrap().take() else {
            bail!("unexpected submission");
        };
        self.depth.lock().unwrap().insert(hash.clone(), 0);
        Ok(hash)
    }
}

#[async_trait]
impl ConfirmationSource for MockNode {
    async fn confirmation_depth(&self, tx_hash: &str, _: NetworkKind) -> Result<Option<u64>> {
        Ok(self.depth.lock().unwrap().get(tx_hash).copied())
    }
}

#[derive(Default)]
pub struct MemorySink(Mutex<Vec<(String, String)>>);

impl MemorySink {
    pub fn delivered(&self) -> Vec<(String, String)> {
        self.0.lock().unwrap().clone()
    }
}

#[async_trait]
impl PayloadSink for MemorySink {
    async fn deliver(&self, payload_id: &str, data: &str) -> Result<()> {
        self.0
            .lock()
            .unwrap()
            .push((payload_id.to_string(), data.to_string()));
        Ok(())
    }
}

/// A running gateway on the loopback mesh.
pub struct GatewayNode {
    pub store: SegmentStore,
    pub shutdown: broadcast::Sender<()>,
    pub task: tokio::task::JoinHandle<Result<()>>,
}

impl GatewayNode {
    pub async fn stop(self) {
        let _ = self.shutdown.send(());
        let _ = self.task.await;
    }
}

/// Attach a gateway at `GATEWAY_GID`. `configure` adds collaborators.
pub fn spawn_gateway(
    hub: &LoopbackHub,
    encoding: &'static dyn PayloadEncoding,
    node: Option<Arc<MockNode>>,
    configure: impl FnOnce(Gateway) -> Gateway,
) -> GatewayNode {
    let (transport, inbound) = hub.attach(GATEWAY_GID);
    let store = SegmentStore::new();
    let mut gateway = Gateway::new(store.clone())
        .with_encoding(encoding)
        .with_retry(RetryPolicy {
            delay: Duration::from_secs(1),
            max_attempts: 3,
        });

    if let Some(node) = node {
        let tracker = ConfirmationTracker::new(node.clone(), Arc::new(transport))
            .with_polling(Duration::from_secs(1), 30);
        gateway = gateway.with_submitter(node).with_confirmations(tracker);
    }
    let gateway = configure(gateway);

    let (shutdown, shutdown_rx) = broadcast::channel(1);
    let task = tokio::spawn(gateway.run(inbound, shutdown_rx));
    GatewayNode {
        store,
        shutdown,
        task,
    }
}

/// Attach a sender at `gid`, returning its inbox for confirmation notices.
pub fn attach_sender(
    hub: &LoopbackHub,
    gid: Gid,
    encoding: &'static dyn PayloadEncoding,
) -> (SegmentSender, mpsc::Receiver<InboundMessage>) {
    let (transport, inbox) = hub.attach(gid);
    let sender = SegmentSender::new(Arc::new(transport), encoding)
        .with_interval(Duration::from_millis(10));
    (sender, inbox)
}

/// Next decoded message from an inbox, or an error after `secs`.
pub async fn next_segment(inbox: &mut mpsc::Receiver<InboundMessage>, secs: u64) -> Result<Segment> {
    match tokio::time::timeout(Duration::from_secs(secs), inbox.recv()).await {
        Ok(Some(msg)) => Ok(Segment::from_slice(&msg.payload)?),
        Ok(None) => bail!("inbox closed"),
        Err(_) => bail!("no message within {secs}s"),
    }
}

/// Poll `check` until it returns true, up to `attempts` times 50ms apart.
pub async fn wait_until<F, Fut>(attempts: u32, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..attempts {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

pub fn hex_payload(len: usize) -> String {
    "0123456789abcdef".chars().cycle().take(len).collect()
}
