//! Segment store: accumulates segments per payload until complete.
//!
//! Both maps live behind one mutex; every operation takes the lock once
//! and never awaits while holding it. Entries are keyed by sequence number,
//! so a resent segment overwrites its earlier copy instead of inflating the
//! count.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use txmule_core::{NetworkKind, Segment};

/// What `put` did with a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// New sequence number for this payload.
    Stored,
    /// Replaced an earlier copy of the same sequence number.
    Duplicate,
    /// Confirmation notices are not payload segments.
    Rejected,
}

/// Progress of one tracked payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadProgress {
    pub payload_id: String,
    pub have: usize,
    pub expected: Option<u32>,
    pub dispatched: bool,
}

struct PayloadEntry {
    segments: BTreeMap<u32, Segment>,
    last_seen: Instant,
    dispatched: bool,
}

impl PayloadEntry {
    fn new() -> Self {
        Self {
            segments: BTreeMap::new(),
            last_seen: Instant::now(),
            dispatched: false,
        }
    }

    fn head(&self) -> Option<&Segment> {
        self.segments.get(&0)
    }

    fn expected(&self) -> Option<u32> {
        self.head().and_then(|h| h.segment_count)
    }

    /// Distinct sequence numbers inside `0..expected`.
    fn have(&self) -> usize {
        match self.expected() {
            Some(count) => self.segments.range(..count).count(),
            None => self.segments.len(),
        }
    }

    fn is_complete(&self) -> bool {
        self.expected()
            .is_some_and(|count| self.have() == count as usize)
    }

    fn tx_hash(&self) -> Option<&str> {
        self.head().and_then(|h| h.tx_hash.as_deref())
    }

    fn progress(&self, payload_id: &str) -> PayloadProgress {
        PayloadProgress {
            payload_id: payload_id.to_string(),
            have: self.have(),
            expected: self.expected(),
            dispatched: self.dispatched,
        }
    }
}

#[derive(Default)]
struct StoreInner {
    /// payload_id -> entry
    payloads: HashMap<String, PayloadEntry>,
    /// tx_hash -> payload_id
    by_hash: HashMap<String, String>,
}

impl StoreInner {
    fn remove(&mut self, payload_id: &str) -> bool {
        let Some(entry) = self.payloads.remove(payload_id) else {
            return false;
        };
        if let Some(hash) = entry.tx_hash() {
            if self.by_hash.get(hash).map(String::as_str) == Some(payload_id) {
                self.by_hash.remove(hash);
            }
        }
        true
    }

    fn evict_oldest_except(&mut self, keep: &str) -> Option<String> {
        let oldest = self
            .payloads
            .iter()
            .filter(|(id, _)| id.as_str() != keep)
            .min_by_key(|(_, entry)| entry.last_seen)
            .map(|(id, _)| id.clone())?;
        self.remove(&oldest);
        Some(oldest)
    }
}

/// In-memory index of in-flight and completed payloads.
#[derive(Clone)]
pub struct SegmentStore {
    inner: Arc<Mutex<StoreInner>>,
    /// 0 = unbounded.
    max_entries: usize,
}

impl Default for SegmentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SegmentStore {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Store that tracks at most `max_entries` payloads, evicting the
    /// least recently touched one on overflow.
    pub fn with_capacity(max_entries: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(StoreInner::default())),
            max_entries,
        }
    }

    /// Add a segment to its payload entry, creating the entry if needed.
    pub async fn put(&self, segment: Segment) -> PutOutcome {
        if segment.is_confirmation() {
            tracing::debug!(segment = %segment, "confirmation notice is not stored");
            return PutOutcome::Rejected;
        }

        let mut inner = self.inner.lock().await;
        let payload_id = segment.payload_id.clone();
        let entry = inner
            .payloads
            .entry(payload_id.clone())
            .or_insert_with(PayloadEntry::new);

        let mut stale_hash = None;
        if segment.is_head() {
            if let Some(previous) = entry.head() {
                if previous.network_kind != segment.network_kind {
                    tracing::warn!(
                        payload_id = %payload_id,
                        was = %previous.network_kind,
                        now = %segment.network_kind,
                        "head segment resent with a different network, keeping the latest"
                    );
                }
                if previous.tx_hash != segment.tx_hash {
                    stale_hash = previous.tx_hash.clone();
                }
            }
        }

        let new_hash = if segment.is_head() {
            segment.tx_hash.clone()
        } else {
            None
        };
        let sequence_num = segment.sequence_num;
        let replaced = entry.segments.insert(sequence_num, segment).is_some();
        entry.last_seen = Instant::now();

        let progress = entry.progress(&payload_id);

        if let Some(hash) = stale_hash {
            if inner.by_hash.get(&hash) == Some(&payload_id) {
                inner.by_hash.remove(&hash);
            }
        }
        if let Some(hash) = new_hash {
            inner.by_hash.insert(hash, payload_id.clone());
        }

        if self.max_entries > 0 && inner.payloads.len() > self.max_entries {
            if let Some(evicted) = inner.evict_oldest_except(&payload_id) {
                tracing::warn!(payload_id = %evicted, "store full, evicted oldest payload");
            }
        }

        tracing::debug!(
            payload_id = %payload_id,
            sequence_num,
            have = progress.have,
            expected = ?progress.expected,
            replaced,
            "segment stored"
        );

        if replaced {
            PutOutcome::Duplicate
        } else {
            PutOutcome::Stored
        }
    }

    /// Segments of a payload, ordered by sequence number.
    pub async fn get(&self, payload_id: &str) -> Option<Vec<Segment>> {
        let inner = self.inner.lock().await;
        inner
            .payloads
            .get(payload_id)
            .map(|entry| entry.segments.values().cloned().collect())
    }

    /// Resolve a transaction/content hash through the secondary index.
    pub async fn get_by_hash(&self, tx_hash: &str) -> Option<Vec<Segment>> {
        let inner = self.inner.lock().await;
        let payload_id = inner.by_hash.get(tx_hash)?;
        inner
            .payloads
            .get(payload_id)
            .map(|entry| entry.segments.values().cloned().collect())
    }

    /// Payload id a hash maps to, if its head has arrived.
    pub async fn payload_id_for_hash(&self, tx_hash: &str) -> Option<String> {
        self.inner.lock().await.by_hash.get(tx_hash).cloned()
    }

    /// Hash carried by the payload's head segment.
    pub async fn transaction_id(&self, payload_id: &str) -> Option<String> {
        let inner = self.inner.lock().await;
        inner
            .payloads
            .get(payload_id)
            .and_then(|entry| entry.tx_hash().map(String::from))
    }

    /// True once every sequence number below the head's count is present.
    pub async fn is_complete(&self, payload_id: &str) -> bool {
        let inner = self.inner.lock().await;
        inner
            .payloads
            .get(payload_id)
            .is_some_and(PayloadEntry::is_complete)
    }

    /// Network kind from the head segment; None until the head arrives.
    pub async fn network_kind(&self, payload_id: &str) -> Option<NetworkKind> {
        let inner = self.inner.lock().await;
        inner
            .payloads
            .get(payload_id)
            .and_then(|entry| entry.head().map(|h| h.network_kind))
    }

    /// Concatenate the payload slices in sequence order.
    pub async fn assemble(&self, payload_id: &str) -> Result<String, StoreError> {
        let inner = self.inner.lock().await;
        let entry = inner
            .payloads
            .get(payload_id)
            .ok_or_else(|| StoreError::NotFound(payload_id.to_string()))?;

        if !entry.is_complete() {
            return Err(StoreError::Incomplete {
                payload_id: payload_id.to_string(),
                have: entry.have(),
                expected: entry.expected(),
            });
        }

        let count = entry.expected().unwrap_or_default();
        Ok(entry
            .segments
            .range(..count)
            .map(|(_, seg)| seg.payload.as_str())
            .collect())
    }

    /// Claim a complete payload for downstream handling.
    ///
    /// Returns true for exactly one caller per payload; false while the
    /// payload is incomplete, already claimed, or unknown.
    pub async fn mark_dispatched(&self, payload_id: &str) -> bool {
        let mut inner = self.inner.lock().await;
        match inner.payloads.get_mut(payload_id) {
            Some(entry) if entry.is_complete() && !entry.dispatched => {
                entry.dispatched = true;
                true
            }
            _ => false,
        }
    }

    /// Drop a payload and its hash index row. No-op if absent.
    pub async fn remove(&self, payload_id: &str) {
        if self.inner.lock().await.remove(payload_id) {
            tracing::debug!(payload_id, "payload removed from store");
        }
    }

    /// Evict payloads untouched for at least `max_age`. Returns their ids.
    pub async fn evict_stale(&self, max_age: Duration) -> Vec<String> {
        let mut inner = self.inner.lock().await;
        let stale: Vec<String> = inner
            .payloads
            .iter()
            .filter(|(_, entry)| entry.last_seen.elapsed() >= max_age)
            .map(|(id, _)| id.clone())
            .collect();

        for payload_id in &stale {
            inner.remove(payload_id);
            tracing::warn!(payload_id = %payload_id, "removing stale payload (timed out)");
        }
        stale
    }

    /// Payloads currently tracked, complete or not.
    pub async fn in_progress(&self) -> Vec<PayloadProgress> {
        let inner = self.inner.lock().await;
        inner
            .payloads
            .iter()
            .map(|(id, entry)| entry.progress(id))
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.payloads.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("no payload {0}")]
    NotFound(String),

    #[error("payload {payload_id} incomplete: {have} of {expected:?} segments")]
    Incomplete {
        payload_id: String,
        have: usize,
        expected: Option<u32>,
    },
}
