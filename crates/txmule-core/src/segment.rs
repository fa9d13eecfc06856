//! Segment wire format: one JSON object per mesh message.
//!
//! Keys are single letters to save airtime:
//!
//! | key | meaning | present on |
//! |-----|---------|------------|
//! | `i` | payload id | data segments |
//! | `t` | payload slice | data segments |
//! | `c` | sequence number, omitted when 0 | tail segments |
//! | `s` | segment count | head segment |
//! | `h` | transaction / content hash | head segment, confirmation |
//! | `n` | network flag `t` or `d`, omitted for mainnet | head segment |
//! | `b` | confirmation depth / block | confirmation only |
//!
//! A confirmation notice always serializes as `{"h":..,"b":..}` and nothing
//! else, whatever other fields the record carries.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

// ── Network kind ──────────────────────────────────────────────────────────────

/// How the receiver handles a completed payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkKind {
    /// Bitcoin mainnet transaction.
    #[default]
    Mainnet,
    /// Bitcoin testnet3 transaction.
    Testnet,
    /// Opaque message data, dumped rather than broadcast.
    Data,
}

impl NetworkKind {
    /// Single-character wire flag.
    pub fn flag(self) -> &'static str {
        match self {
            Self::Mainnet => "m",
            Self::Testnet => "t",
            Self::Data => "d",
        }
    }

    /// Parse a wire flag. Senders in the field emit `m` explicitly.
    pub fn from_flag(flag: &str) -> Option<Self> {
        match flag {
            "m" => Some(Self::Mainnet),
            "t" => Some(Self::Testnet),
            "d" => Some(Self::Data),
            _ => None,
        }
    }

    /// Whether a completed payload is a raw transaction for a node.
    pub fn is_transaction(self) -> bool {
        !matches!(self, Self::Data)
    }
}

impl fmt::Display for NetworkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Mainnet => "mainnet",
            Self::Testnet => "testnet",
            Self::Data => "data",
        };
        f.write_str(name)
    }
}

// ── Segment ───────────────────────────────────────────────────────────────────

/// Which of the three shapes a segment has.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    Head,
    Tail,
    Confirmation,
}

/// One fragment of a payload, or a standalone confirmation notice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "WireSegment", try_from = "WireSegment")]
pub struct Segment {
    /// Shared by every segment of one payload. Empty for confirmations.
    pub payload_id: String,
    /// This segment's slice of the (possibly pre-encoded) payload.
    pub payload: String,
    /// Zero-based position. 0 is the head.
    pub sequence_num: u32,
    /// Total segments, head only.
    pub segment_count: Option<u32>,
    /// Hash of the whole payload, head and confirmation only.
    pub tx_hash: Option<String>,
    pub network_kind: NetworkKind,
    /// Confirmation depth. When set the record is a confirmation notice.
    pub block: Option<u64>,
}

impl Segment {
    pub fn head(
        payload_id: impl Into<String>,
        payload: impl Into<String>,
        segment_count: u32,
        tx_hash: impl Into<String>,
        network_kind: NetworkKind,
    ) -> Self {
        Self {
            payload_id: payload_id.into(),
            payload: payload.into(),
            sequence_num: 0,
            segment_count: Some(segment_count),
            tx_hash: Some(tx_hash.into()),
            network_kind,
            block: None,
        }
    }

    /// Continuation segment. `sequence_num` 0 is reserved for the head.
    pub fn tail(payload_id: impl Into<String>, payload: impl Into<String>, sequence_num: u32) -> Self {
        debug_assert!(sequence_num > 0, "sequence 0 is the head segment");
        Self {
            payload_id: payload_id.into(),
            payload: payload.into(),
            sequence_num,
            segment_count: None,
            tx_hash: None,
            network_kind: NetworkKind::Mainnet,
            block: None,
        }
    }

    pub fn confirmation(tx_hash: impl Into<String>, block: u64) -> Self {
        Self {
            payload_id: String::new(),
            payload: String::new(),
            sequence_num: 0,
            segment_count: None,
            tx_hash: Some(tx_hash.into()),
            network_kind: NetworkKind::Mainnet,
            block: Some(block),
        }
    }

    pub fn kind(&self) -> SegmentKind {
        if self.block.is_some() {
            SegmentKind::Confirmation
        } else if self.sequence_num == 0 {
            SegmentKind::Head
        } else {
            SegmentKind::Tail
        }
    }

    pub fn is_head(&self) -> bool {
        self.kind() == SegmentKind::Head
    }

    pub fn is_confirmation(&self) -> bool {
        self.kind() == SegmentKind::Confirmation
    }

    /// Compact JSON for transmission.
    pub fn to_json(&self) -> String {
        serde_json::to_string(&WireSegment::from(self.clone()))
            .expect("segment serialization failed")
    }

    /// Wire bytes, as handed to the transport.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_json().into_bytes()
    }

    /// Parse and validate one wire record.
    pub fn from_json(text: &str) -> Result<Self, MalformedSegment> {
        Self::from_slice(text.as_bytes())
    }

    pub fn from_slice(data: &[u8]) -> Result<Self, MalformedSegment> {
        let wire: WireSegment =
            serde_json::from_slice(data).map_err(|e| MalformedSegment::InvalidJson(e.to_string()))?;
        Segment::try_from(wire)
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            SegmentKind::Confirmation => write!(
                f,
                "Tx {} confirmation {}",
                self.tx_hash.as_deref().unwrap_or("?"),
                self.block.unwrap_or_default()
            ),
            _ => write!(f, "Payload {} part {}", self.payload_id, self.sequence_num),
        }
    }
}

// ── Wire representation ───────────────────────────────────────────────────────

/// Serde mirror of the JSON object. Signed integers so negative values
/// reach validation instead of failing as generic JSON errors.
#[derive(Debug, Default, Serialize, Deserialize)]
struct WireSegment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    i: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    t: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    c: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    s: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    h: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    n: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_int"
    )]
    b: Option<i64>,
}

impl From<Segment> for WireSegment {
    fn from(seg: Segment) -> Self {
        if let Some(block) = seg.block {
            return WireSegment {
                h: seg.tx_hash,
                b: Some(block as i64),
                ..Default::default()
            };
        }

        let head = seg.sequence_num == 0;
        WireSegment {
            i: Some(seg.payload_id),
            t: Some(seg.payload),
            c: (!head).then_some(seg.sequence_num as i64),
            s: if head { seg.segment_count.map(i64::from) } else { None },
            h: if head { seg.tx_hash } else { None },
            n: (seg.network_kind != NetworkKind::Mainnet).then(|| seg.network_kind.flag().to_string()),
            b: None,
        }
    }
}

impl TryFrom<WireSegment> for Segment {
    type Error = MalformedSegment;

    fn try_from(wire: WireSegment) -> Result<Self, Self::Error> {
        if let Some(block) = wire.b {
            let tx_hash = wire.h.ok_or(MalformedSegment::ConfirmationWithoutHash)?;
            let block = u64::try_from(block).map_err(|_| MalformedSegment::NegativeBlock(block))?;
            return Ok(Segment::confirmation(tx_hash, block));
        }

        let payload_id = wire
            .i
            .filter(|id| !id.is_empty())
            .ok_or(MalformedSegment::MissingPayloadId)?;
        let payload = wire.t.ok_or(MalformedSegment::MissingPayload)?;

        let c = wire.c.unwrap_or(0);
        let sequence_num = u32::try_from(c).map_err(|_| MalformedSegment::InvalidSequence(c))?;

        let network_kind = match wire.n.as_deref() {
            None => NetworkKind::Mainnet,
            Some(flag) => NetworkKind::from_flag(flag)
                .ok_or_else(|| MalformedSegment::UnknownNetwork(flag.to_string()))?,
        };

        if sequence_num == 0 {
            let (s, tx_hash) = match (wire.s, wire.h) {
                (Some(s), Some(h)) => (s, h),
                _ => return Err(MalformedSegment::MissingHeadFields),
            };
            let segment_count = u32::try_from(s)
                .ok()
                .filter(|&n| n > 0)
                .ok_or(MalformedSegment::InvalidSegmentCount(s))?;
            Ok(Segment::head(payload_id, payload, segment_count, tx_hash, network_kind))
        } else {
            if wire.s.is_some() || wire.h.is_some() {
                return Err(MalformedSegment::TailWithHeadFields);
            }
            let mut seg = Segment::tail(payload_id, payload, sequence_num);
            seg.network_kind = network_kind;
            Ok(seg)
        }
    }
}

/// Accept `"b": 3` and `"b": "3"`; older gateways stringify the depth.
fn lenient_int<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrText {
        Number(i64),
        Text(String),
    }

    match Option::<NumberOrText>::deserialize(deserializer)? {
        None => Ok(None),
        Some(NumberOrText::Number(n)) => Ok(Some(n)),
        Some(NumberOrText::Text(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// A wire record that does not have one of the three legal shapes.
/// The message is dropped; store state is untouched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MalformedSegment {
    #[error("not a JSON segment object: {0}")]
    InvalidJson(String),

    #[error("data segment has no payload id (`i`)")]
    MissingPayloadId,

    #[error("data segment has no payload (`t`)")]
    MissingPayload,

    #[error("head segment is missing segment count (`s`) or hash (`h`)")]
    MissingHeadFields,

    #[error("tail segment carries head fields (`s`/`h`)")]
    TailWithHeadFields,

    #[error("invalid sequence number {0}")]
    InvalidSequence(i64),

    #[error("invalid segment count {0}")]
    InvalidSegmentCount(i64),

    #[error("confirmation notice has no hash (`h`)")]
    ConfirmationWithoutHash,

    #[error("negative confirmation depth {0}")]
    NegativeBlock(i64),

    #[error("unknown network flag {0:?}")]
    UnknownNetwork(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn parse(text: &str) -> Value {
        serde_json::from_str(text).unwrap()
    }

    #[test]
    fn head_serializes_with_count_and_hash() {
        let seg = Segment::head("p1", "0100", 3, "abc123", NetworkKind::Mainnet);
        assert_eq!(
            parse(&seg.to_json()),
            serde_json::json!({"i": "p1", "t": "0100", "s": 3, "h": "abc123"})
        );
    }

    #[test]
    fn tail_serializes_without_head_fields() {
        let seg = Segment::tail("p1", "ffee", 2);
        assert_eq!(
            parse(&seg.to_json()),
            serde_json::json!({"i": "p1", "t": "ffee", "c": 2})
        );
    }

    #[test]
    fn network_flag_only_for_testnet_and_data() {
        let t = Segment::head("p", "x", 1, "h", NetworkKind::Testnet);
        assert_eq!(parse(&t.to_json())["n"], "t");
        let d = Segment::head("p", "x", 1, "h", NetworkKind::Data);
        assert_eq!(parse(&d.to_json())["n"], "d");
        let m = Segment::head("p", "x", 1, "h", NetworkKind::Mainnet);
        assert!(parse(&m.to_json()).get("n").is_none());
    }

    #[test]
    fn output_is_compact() {
        let seg = Segment::head("p1", "a b", 1, "h", NetworkKind::Mainnet);
        let json = seg.to_json();
        assert!(!json.contains(": "));
        assert!(!json.contains(", "));
    }

    #[test]
    fn confirmation_shape_wins() {
        let mut seg = Segment::head("p1", "deadbeef", 4, "abc", NetworkKind::Testnet);
        seg.block = Some(7);
        assert_eq!(seg.kind(), SegmentKind::Confirmation);
        assert_eq!(seg.to_json(), r#"{"h":"abc","b":7}"#);
    }

    #[test]
    fn round_trip_all_shapes() {
        let shapes = [
            Segment::head("a1", "0100", 2, "ff00", NetworkKind::Data),
            Segment::tail("a1", "0200", 1),
            Segment::confirmation("ff00", 0),
            Segment::confirmation("ff00", 812_345),
        ];
        for seg in shapes {
            assert_eq!(Segment::from_json(&seg.to_json()).unwrap(), seg);
        }
    }

    #[test]
    fn decode_accepts_any_key_order_and_defaults() {
        let seg = Segment::from_json(r#"{"h":"abc","s":1,"t":"00","i":"p"}"#).unwrap();
        assert_eq!(seg.sequence_num, 0);
        assert_eq!(seg.network_kind, NetworkKind::Mainnet);
        assert_eq!(seg.segment_count, Some(1));
    }

    #[test]
    fn decode_network_flags() {
        let t = Segment::from_json(r#"{"i":"p","t":"x","s":1,"h":"h","n":"t"}"#).unwrap();
        assert_eq!(t.network_kind, NetworkKind::Testnet);
        let d = Segment::from_json(r#"{"i":"p","t":"x","s":1,"h":"h","n":"d"}"#).unwrap();
        assert_eq!(d.network_kind, NetworkKind::Data);
        let m = Segment::from_json(r#"{"i":"p","t":"x","s":1,"h":"h","n":"m"}"#).unwrap();
        assert_eq!(m.network_kind, NetworkKind::Mainnet);
        let bad = Segment::from_json(r#"{"i":"p","t":"x","s":1,"h":"h","n":"q"}"#);
        assert_eq!(bad, Err(MalformedSegment::UnknownNetwork("q".into())));
    }

    #[test]
    fn decode_head_with_explicit_zero_sequence() {
        let seg = Segment::from_json(r#"{"i":"p","t":"x","c":0,"s":2,"h":"h"}"#).unwrap();
        assert!(seg.is_head());
    }

    #[test]
    fn decode_rejects_mixed_markers() {
        assert_eq!(
            Segment::from_json(r#"{"i":"p","t":"x","c":1,"s":2}"#),
            Err(MalformedSegment::TailWithHeadFields)
        );
        assert_eq!(
            Segment::from_json(r#"{"i":"p","t":"x","c":3,"h":"abc"}"#),
            Err(MalformedSegment::TailWithHeadFields)
        );
    }

    #[test]
    fn decode_rejects_incomplete_head() {
        assert_eq!(
            Segment::from_json(r#"{"i":"p","t":"x","s":2}"#),
            Err(MalformedSegment::MissingHeadFields)
        );
        assert_eq!(
            Segment::from_json(r#"{"i":"p","t":"x"}"#),
            Err(MalformedSegment::MissingHeadFields)
        );
        assert_eq!(
            Segment::from_json(r#"{"i":"p","t":"x","s":0,"h":"h"}"#),
            Err(MalformedSegment::InvalidSegmentCount(0))
        );
    }

    #[test]
    fn decode_rejects_missing_id_or_payload() {
        assert_eq!(
            Segment::from_json(r#"{"t":"x","c":1}"#),
            Err(MalformedSegment::MissingPayloadId)
        );
        assert_eq!(
            Segment::from_json(r#"{"i":"","t":"x","c":1}"#),
            Err(MalformedSegment::MissingPayloadId)
        );
        assert_eq!(
            Segment::from_json(r#"{"i":"p","c":1}"#),
            Err(MalformedSegment::MissingPayload)
        );
        assert_eq!(
            Segment::from_json(r#"{"i":"p","t":"x","c":-1}"#),
            Err(MalformedSegment::InvalidSequence(-1))
        );
    }

    #[test]
    fn decode_confirmation_variants() {
        let seg = Segment::from_json(r#"{"b":"3","h":"abc"}"#).unwrap();
        assert_eq!(seg, Segment::confirmation("abc", 3));

        // extra fields on a confirmation are dropped
        let seg = Segment::from_json(r#"{"i":"p","t":"x","s":1,"h":"abc","b":0}"#).unwrap();
        assert_eq!(seg, Segment::confirmation("abc", 0));

        assert_eq!(
            Segment::from_json(r#"{"b":2}"#),
            Err(MalformedSegment::ConfirmationWithoutHash)
        );
        assert_eq!(
            Segment::from_json(r#"{"b":-1,"h":"abc"}"#),
            Err(MalformedSegment::NegativeBlock(-1))
        );
    }

    #[test]
    fn decode_rejects_non_objects() {
        assert!(matches!(
            Segment::from_json("[1,2,3]"),
            Err(MalformedSegment::InvalidJson(_))
        ));
        assert!(matches!(
            Segment::from_json("not json"),
            Err(MalformedSegment::InvalidJson(_))
        ));
    }

    #[test]
    fn serde_embedding_uses_wire_form() {
        let seg = Segment::tail("p", "x", 5);
        let value = serde_json::to_value(&seg).unwrap();
        assert_eq!(value, serde_json::json!({"i": "p", "t": "x", "c": 5}));
        let back: Segment = serde_json::from_value(value).unwrap();
        assert_eq!(back, seg);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "sequence 0 is the head segment")]
    fn tail_at_sequence_zero_panics() {
        let _ = Segment::tail("p", "x", 0);
    }
}
