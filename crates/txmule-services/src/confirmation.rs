//! Confirmation tracker.
//!
//! After a transaction payload starts arriving, poll the node and tell the
//! originating node twice: once when the transaction reaches the mempool
//! (`b: 0`) and once when it has at least one confirmation.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;

use txmule_core::{NetworkKind, Segment};

use crate::send_target::{Gid, SendTarget};
use crate::service::{ConfirmationSource, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationOutcome {
    /// Buried at this depth; both notices sent.
    Confirmed(u64),
    /// Seen by the node but never confirmed within the attempt budget.
    InMempool,
    /// Never seen by the node.
    GaveUp,
}

#[derive(Clone)]
pub struct ConfirmationTracker {
    source: Arc<dyn ConfirmationSource>,
    transport: Arc<dyn Transport>,
    /// tx_hash -> requesting gid, while a poll task is running.
    active: Arc<DashMap<String, Gid>>,
    poll_interval: Duration,
    max_attempts: u32,
}

impl ConfirmationTracker {
    pub fn new(source: Arc<dyn ConfirmationSource>, transport: Arc<dyn Transport>) -> Self {
        Self {
            source,
            transport,
            active: Arc::new(DashMap::new()),
            poll_interval: Duration::from_secs(60),
            max_attempts: 30,
        }
    }

    pub fn with_polling(mut self, poll_interval: Duration, max_attempts: u32) -> Self {
        self.poll_interval = poll_interval;
        self.max_attempts = max_attempts;
        self
    }

    pub fn is_tracking(&self, tx_hash: &str) -> bool {
        self.active.contains_key(tx_hash)
    }

    /// Start following `tx_hash` on behalf of `requester`.
    ///
    /// Returns None if the hash is already being followed.
    pub fn track(
        &self,
        tx_hash: String,
        network: NetworkKind,
        requester: Gid,
    ) -> Option<tokio::task::JoinHandle<ConfirmationOutcome>> {
        match self.active.entry(tx_hash.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                tracing::trace!(tx_hash = %tx_hash, "already tracking confirmation");
                return None;
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(requester);
            }
        }

        let tracker = self.clone();
        Some(tokio::spawn(async move {
            let outcome = tracker.follow(&tx_hash, network, requester).await;
            tracker.active.remove(&tx_hash);
            tracing::info!(tx_hash = %tx_hash, ?outcome, "confirmation tracking finished");
            outcome
        }))
    }

    /// Poll until confirmed or the attempt budget runs out.
    pub async fn follow(
        &self,
        tx_hash: &str,
        network: NetworkKind,
        requester: Gid,
    ) -> ConfirmationOutcome {
        let mut seen = false;

        for attempt in 0..self.max_attempts {
            if attempt > 0 {
                tokio::time::sleep(self.poll_interval).await;
            }

            let depth = match self.source.confirmation_depth(tx_hash, network).await {
                Ok(depth) => depth,
                Err(e) => {
                    tracing::warn!(tx_hash, attempt, error = %e, "confirmation lookup failed");
                    continue;
                }
            };

            match depth {
                None => {
                    tracing::debug!(tx_hash, attempt, "transaction not yet known to node");
                }
                Some(depth) => {
                    if !seen {
                        seen = true;
                        self.notify(tx_hash, 0, requester).await;
                    }
                    if depth >= 1 {
                        self.notify(tx_hash, depth, requester).await;
                        return ConfirmationOutcome::Confirmed(depth);
                    }
                }
            }
        }

        if seen {
            ConfirmationOutcome::InMempool
        } else {
            tracing::warn!(tx_hash, attempts = self.max_attempts, "gave up waiting for transaction");
            ConfirmationOutcome::GaveUp
        }
    }

    async fn notify(&self, tx_hash: &str, block: u64, requester: Gid) {
        let notice = Segment::confirmation(tx_hash, block);
        let bytes = Bytes::from(notice.to_bytes());
        match self
            .transport
            .send(SendTarget::Private { gid: requester }, bytes)
            .await
        {
            Ok(_) => tracing::info!(tx_hash, block, to = requester, "confirmation notice sent"),
            Err(e) => {
                tracing::warn!(tx_hash, block, to = requester, error = %e, "confirmation notice not sent")
            }
        }
    }
}
