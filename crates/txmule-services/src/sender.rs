//! Paced segment sender.
//!
//! Segments one payload and emits the segments in order through the
//! transport, sleeping between sends so a slow mesh is not flooded.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use txmule_core::chunking::MESSAGE_INDEX_MODULUS;
use txmule_core::{Chunker, CodecError, NetworkKind, PayloadEncoding, SegmentLimits};

use crate::send_target::SendTarget;
use crate::service::{Transport, TransportError};

/// What one `send_payload` call put on the air.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReport {
    pub payload_id: String,
    pub segments: usize,
    pub message_index: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("segmenting failed: {0}")]
    Codec(#[from] CodecError),

    #[error("segment {sequence_num} of {payload_id} not sent: {source}")]
    Transport {
        payload_id: String,
        sequence_num: u32,
        #[source]
        source: TransportError,
    },
}

pub struct SegmentSender {
    transport: Arc<dyn Transport>,
    encoding: &'static dyn PayloadEncoding,
    limits: SegmentLimits,
    interval: Duration,
    next_index: AtomicU32,
}

impl SegmentSender {
    pub fn new(transport: Arc<dyn Transport>, encoding: &'static dyn PayloadEncoding) -> Self {
        Self {
            transport,
            encoding,
            limits: SegmentLimits::for_encoding(encoding),
            interval: Duration::from_secs(10),
            next_index: AtomicU32::new(0),
        }
    }

    pub fn with_limits(mut self, limits: SegmentLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Delay between consecutive segments of one payload.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// First message index to use. Wrapped into `0..9999`.
    pub fn with_start_index(self, index: u32) -> Self {
        self.next_index
            .store(index % MESSAGE_INDEX_MODULUS, Ordering::Relaxed);
        self
    }

    fn take_index(&self) -> u32 {
        let mut current = self.next_index.load(Ordering::Relaxed);
        loop {
            let next = (current + 1) % MESSAGE_INDEX_MODULUS;
            match self.next_index.compare_exchange_weak(
                current,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return current,
                Err(actual) => current = actual,
            }
        }
    }

    /// Segment `raw` and send every segment to `target`.
    ///
    /// Encoding failures send nothing. A transport failure stops the
    /// remaining segments; the receiver's store will evict the partial.
    pub async fn send_payload(
        &self,
        target: SendTarget,
        raw: &str,
        tx_hash: &str,
        network_kind: NetworkKind,
    ) -> Result<SendReport, SendError> {
        let message_index = self.take_index();
        let segments = Chunker::new(self.encoding)
            .with_limits(self.limits)
            .segment(
                self.transport.local_gid(),
                message_index,
                raw,
                tx_hash,
                network_kind,
            )?;

        let payload_id = segments
            .first()
            .map(|s| s.payload_id.clone())
            .unwrap_or_default();
        let count = segments.len();

        tracing::info!(
            payload_id = %payload_id,
            segments = count,
            network = %network_kind,
            encoding = self.encoding.name(),
            "sending payload"
        );

        for (i, segment) in segments.into_iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.interval).await;
            }
            let sequence_num = segment.sequence_num;
            let bytes = Bytes::from(segment.to_bytes());
            self.transport
                .send(target, bytes)
                .await
                .map_err(|source| SendError::Transport {
                    payload_id: payload_id.clone(),
                    sequence_num,
                    source,
                })?;
            tracing::debug!(payload_id = %payload_id, sequence_num, "segment sent");
        }

        Ok(SendReport {
            payload_id,
            segments: count,
            message_index,
        })
    }
}
