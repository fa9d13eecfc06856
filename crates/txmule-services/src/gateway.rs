//! Gateway receive path.
//!
//! Decodes every inbound message, files segments in the store, and hands a
//! completed payload downstream exactly once: a node submission for
//! mainnet/testnet transactions, the payload sink for message data.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{broadcast, mpsc};

use txmule_core::encoding::Identity;
use txmule_core::{MalformedSegment, NetworkKind, PayloadEncoding, Segment};

use crate::confirmation::ConfirmationTracker;
use crate::segment_store::{PutOutcome, SegmentStore};
use crate::send_target::{Gid, InboundMessage};
use crate::service::{PayloadSink, Relay, TxSubmitter};

/// How often a failed downstream call is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub delay: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(60),
            max_attempts: 30,
        }
    }
}

/// Result of handing a completed payload downstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Submitted { txid: String },
    Delivered,
    /// No collaborator configured for this network kind.
    Skipped,
    Failed,
}

/// What `handle_message` did with one inbound message.
#[derive(Debug)]
pub enum Handled {
    Confirmation { tx_hash: String, block: u64 },
    Stored { payload_id: String, outcome: PutOutcome },
    /// This message completed its payload; downstream runs on `task`.
    Completed {
        payload_id: String,
        task: tokio::task::JoinHandle<DispatchOutcome>,
    },
}

#[derive(Clone)]
pub struct Gateway {
    store: SegmentStore,
    encoding: &'static dyn PayloadEncoding,
    submitter: Option<Arc<dyn TxSubmitter>>,
    sink: Option<Arc<dyn PayloadSink>>,
    relay: Option<Arc<dyn Relay>>,
    confirmations: Option<ConfirmationTracker>,
    retry: RetryPolicy,
    stale_after: Duration,
    sweep_interval: Duration,
}

impl Gateway {
    pub fn new(store: SegmentStore) -> Self {
        Self {
            store,
            encoding: &Identity,
            submitter: None,
            sink: None,
            relay: None,
            confirmations: None,
            retry: RetryPolicy::default(),
            stale_after: Duration::from_secs(3_600),
            sweep_interval: Duration::from_secs(60),
        }
    }

    pub fn with_encoding(mut self, encoding: &'static dyn PayloadEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn with_submitter(mut self, submitter: Arc<dyn TxSubmitter>) -> Self {
        self.submitter = Some(submitter);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn PayloadSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_relay(mut self, relay: Arc<dyn Relay>) -> Self {
        self.relay = Some(relay);
        self
    }

    pub fn with_confirmations(mut self, tracker: ConfirmationTracker) -> Self {
        self.confirmations = Some(tracker);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Evict payloads idle for `stale_after`, checking every `sweep_interval`.
    pub fn with_eviction(mut self, stale_after: Duration, sweep_interval: Duration) -> Self {
        self.stale_after = stale_after;
        self.sweep_interval = sweep_interval;
        self
    }

    pub fn store(&self) -> &SegmentStore {
        &self.store
    }

    /// Receive loop. Returns when the inbound channel closes or on shutdown.
    pub async fn run(
        self,
        mut inbound: mpsc::Receiver<InboundMessage>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<()> {
        let mut sweep = tokio::time::interval(self.sweep_interval);

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("gateway shutting down");
                    return Ok(());
                }

                _ = sweep.tick() => {
                    let evicted = self.store.evict_stale(self.stale_after).await;
                    if !evicted.is_empty() {
                        tracing::info!(count = evicted.len(), "evicted stale payloads");
                    }
                }

                msg = inbound.recv() => {
                    let Some(msg) = msg else {
                        tracing::info!("inbound channel closed");
                        return Ok(());
                    };
                    if let Err(e) = self.handle_message(msg).await {
                        tracing::warn!(error = %e, "ignoring malformed message");
                    }
                }
            }
        }
    }

    /// Process one inbound message.
    pub async fn handle_message(&self, msg: InboundMessage) -> Result<Handled, MalformedSegment> {
        let segment = Segment::from_slice(&msg.payload)?;

        if let Some(block) = segment.block {
            let tx_hash = segment.tx_hash.unwrap_or_default();
            if block == 0 {
                tracing::info!(tx_hash = %tx_hash, from = msg.sender, "transaction added to the mempool");
            } else {
                tracing::info!(tx_hash = %tx_hash, block, from = msg.sender, "transaction confirmed");
            }
            return Ok(Handled::Confirmation { tx_hash, block });
        }

        if let Some(relay) = &self.relay {
            let relay = relay.clone();
            let raw = msg.payload.clone();
            tokio::spawn(async move {
                if let Err(e) = relay.post_segment(&raw).await {
                    tracing::warn!(error = %e, "relay forward failed");
                }
            });
        }

        if segment.is_head() && segment.network_kind.is_transaction() {
            self.start_tracking(&segment, msg.sender);
        }

        let payload_id = segment.payload_id.clone();
        let outcome = self.store.put(segment).await;

        if self.store.mark_dispatched(&payload_id).await {
            tracing::info!(payload_id = %payload_id, "payload complete");
            let gateway = self.clone();
            let id = payload_id.clone();
            let task = tokio::spawn(async move { gateway.dispatch(&id).await });
            return Ok(Handled::Completed { payload_id, task });
        }

        Ok(Handled::Stored { payload_id, outcome })
    }

    fn start_tracking(&self, head: &Segment, sender: Gid) {
        let (Some(tracker), Some(wire_hash)) = (&self.confirmations, head.tx_hash.as_deref()) else {
            return;
        };
        match self.encoding.decode_hash(wire_hash) {
            Ok(tx_hash) => {
                tracker.track(tx_hash, head.network_kind, sender);
            }
            Err(e) => {
                tracing::warn!(payload_id = %head.payload_id, error = %e, "undecodable tx hash, not tracking")
            }
        }
    }

    /// Assemble, decode and hand off one claimed payload.
    ///
    /// The entry stays in the store, marked dispatched, so resent segments
    /// are absorbed until the stale sweep drops it.
    async fn dispatch(&self, payload_id: &str) -> DispatchOutcome {
        let assembled = match self.store.assemble(payload_id).await {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(payload_id, error = %e, "claimed payload did not assemble");
                return DispatchOutcome::Failed;
            }
        };
        let network = self
            .store
            .network_kind(payload_id)
            .await
            .unwrap_or_default();

        let data = match self.encoding.decode_payload(&assembled) {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!(payload_id, error = %e, "payload failed to decode");
                return DispatchOutcome::Failed;
            }
        };

        match network {
            NetworkKind::Data => {
                let Some(sink) = &self.sink else {
                    tracing::info!(payload_id, bytes = data.len(), "message data received, no sink configured");
                    return DispatchOutcome::Skipped;
                };
                match self
                    .retrying("deliver", payload_id, || sink.deliver(payload_id, &data))
                    .await
                {
                    Some(()) => DispatchOutcome::Delivered,
                    None => DispatchOutcome::Failed,
                }
            }
            NetworkKind::Mainnet | NetworkKind::Testnet => {
                let Some(submitter) = &self.submitter else {
                    tracing::info!(payload_id, %network, "transaction received, no node configured");
                    return DispatchOutcome::Skipped;
                };
                match self
                    .retrying("submit", payload_id, || submitter.submit(&data, network))
                    .await
                {
                    Some(txid) => {
                        tracing::info!(payload_id, %network, txid = %txid, "transaction submitted");
                        DispatchOutcome::Submitted { txid }
                    }
                    None => DispatchOutcome::Failed,
                }
            }
        }
    }

    async fn retrying<T, F, Fut>(&self, what: &str, payload_id: &str, mut op: F) -> Option<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        for attempt in 1..=self.retry.max_attempts.max(1) {
            match op().await {
                Ok(value) => return Some(value),
                Err(e) => {
                    tracing::warn!(payload_id, attempt, error = %e, "{what} failed");
                    if attempt < self.retry.max_attempts {
                        tokio::time::sleep(self.retry.delay).await;
                    }
                }
            }
        }
        tracing::error!(payload_id, attempts = self.retry.max_attempts, "{what} gave up");
        None
    }
}
