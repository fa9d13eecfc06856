//! In-process mesh: every attached node gets an mpsc inbox.
//!
//! Used by tests and by single-host demos. Broadcast reaches every node
//! except the sender; private sends reach one node.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::send_target::{Gid, InboundMessage, SendTarget};
use crate::service::{Delivery, Transport, TransportError};

const INBOX_DEPTH: usize = 256;

#[derive(Clone, Default)]
pub struct LoopbackHub {
    nodes: Arc<DashMap<Gid, mpsc::Sender<InboundMessage>>>,
}

impl LoopbackHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a node. Re-attaching a gid replaces its inbox.
    pub fn attach(&self, gid: Gid) -> (LoopbackTransport, mpsc::Receiver<InboundMessage>) {
        let (tx, rx) = mpsc::channel(INBOX_DEPTH);
        self.nodes.insert(gid, tx);
        let transport = LoopbackTransport {
            gid,
            hub: self.clone(),
        };
        (transport, rx)
    }

    pub fn detach(&self, gid: Gid) {
        self.nodes.remove(&gid);
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

pub struct LoopbackTransport {
    gid: Gid,
    hub: LoopbackHub,
}

#[async_trait]
impl Transport for LoopbackTransport {
    fn local_gid(&self) -> Gid {
        self.gid
    }

    async fn send(&self, target: SendTarget, payload: Bytes) -> Result<Delivery, TransportError> {
        // Clone senders out so no map guard is held across an await.
        let recipients: Vec<mpsc::Sender<InboundMessage>> = match target {
            SendTarget::Broadcast => self
                .hub
                .nodes
                .iter()
                .filter(|e| *e.key() != self.gid)
                .map(|e| e.value().clone())
                .collect(),
            SendTarget::Private { gid } => {
                let tx = self
                    .hub
                    .nodes
                    .get(&gid)
                    .map(|e| e.value().clone())
                    .ok_or(TransportError::UnknownPeer(gid))?;
                vec![tx]
            }
        };

        let bytes = payload.len();
        for tx in recipients {
            let msg = InboundMessage::new(self.gid, payload.clone());
            if tx.send(msg).await.is_err() {
                tracing::debug!(from = self.gid, "loopback inbox closed, skipping");
                if matches!(target, SendTarget::Private { .. }) {
                    return Err(TransportError::Closed);
                }
            }
        }

        Ok(Delivery { target, bytes })
    }
}
