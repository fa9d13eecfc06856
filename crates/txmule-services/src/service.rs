//! Collaborator contracts.
//!
//! The gateway and sender only see these traits. Real adapters (UDP mesh,
//! bitcoind, HTTP relay, file sink) live next to them; tests plug in
//! in-memory versions.

use async_trait::async_trait;
use bytes::Bytes;

use txmule_core::NetworkKind;

use crate::send_target::{Gid, SendTarget};

/// Result of a successful transport send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub target: SendTarget,
    pub bytes: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),

    #[error("no route to node {0}")]
    UnknownPeer(Gid),

    #[error("transport closed")]
    Closed,
}

/// Mesh transport. One call carries one segment.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Gid this node sends as.
    fn local_gid(&self) -> Gid;

    async fn send(&self, target: SendTarget, payload: Bytes) -> Result<Delivery, TransportError>;
}

/// Looks up how deep a transaction is buried.
#[async_trait]
pub trait ConfirmationSource: Send + Sync {
    /// `Ok(None)`: node does not know the tx. `Ok(Some(0))`: mempool.
    /// `Ok(Some(n))`: n confirmations.
    async fn confirmation_depth(
        &self,
        tx_hash: &str,
        network: NetworkKind,
    ) -> anyhow::Result<Option<u64>>;
}

/// Pushes a raw signed transaction to a node. Returns the txid.
#[async_trait]
pub trait TxSubmitter: Send + Sync {
    async fn submit(&self, raw_tx: &str, network: NetworkKind) -> anyhow::Result<String>;
}

/// Receives completed message-data payloads.
#[async_trait]
pub trait PayloadSink: Send + Sync {
    async fn deliver(&self, payload_id: &str, data: &str) -> anyhow::Result<()>;
}

/// Forwards every raw inbound segment to an aggregator.
#[async_trait]
pub trait Relay: Send + Sync {
    async fn post_segment(&self, raw: &[u8]) -> anyhow::Result<()>;
}
