//! Chunking: split a raw payload into wire segments.
//!
//! The head segment holds up to `head` characters of payload, every tail
//! segment up to `tail`. Capacities are measured on the JSON-encoded `t`
//! value, so characters the JSON encoder escapes are charged for their
//! escaped width before the slice is cut.

use std::fmt::Display;

use crate::encoding::{CodecError, PayloadEncoding};
use crate::segment::{NetworkKind, Segment};

/// Senders wrap their message index at this value.
pub const MESSAGE_INDEX_MODULUS: u32 = 9999;

/// Smallest usable capacity: the width of a `\u00XX` escape.
pub const MIN_CAPACITY: usize = 6;

/// Per-segment payload capacities, in JSON-encoded characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentLimits {
    pub head: usize,
    pub tail: usize,
}

impl SegmentLimits {
    pub fn for_encoding(encoding: &dyn PayloadEncoding) -> Self {
        Self {
            head: encoding.head_capacity(),
            tail: encoding.tail_capacity(),
        }
    }

    /// Both capacities must fit the widest single escaped character.
    pub fn validate(self) -> Result<Self, CodecError> {
        if self.head < MIN_CAPACITY || self.tail < MIN_CAPACITY {
            return Err(CodecError::InvalidLimits {
                head: self.head,
                tail: self.tail,
                min: MIN_CAPACITY,
            });
        }
        Ok(self)
    }
}

/// Number of segments an escape-free payload of `len` characters needs.
pub fn segment_count(len: usize, limits: SegmentLimits) -> Result<usize, CodecError> {
    let limits = limits.validate()?;
    Ok(if len <= limits.head {
        1
    } else {
        1 + (len - limits.head).div_ceil(limits.tail)
    })
}

/// Derive the payload id for one send: first 8 bytes of
/// BLAKE3(`"{gid}|{message_index}"`), rendered by the encoding.
///
/// Independent of content, so a new message index always yields a new id.
pub fn derive_payload_id(
    gid: impl Display,
    message_index: u32,
    encoding: &dyn PayloadEncoding,
) -> Result<String, CodecError> {
    let digest = blake3::hash(format!("{gid}|{message_index}").as_bytes());
    let mut id = [0u8; 8];
    id.copy_from_slice(&digest.as_bytes()[..8]);
    encoding.encode_id(&id)
}

/// Splits payloads into segments for one encoding.
pub struct Chunker<'a> {
    encoding: &'a dyn PayloadEncoding,
    limits: SegmentLimits,
}

impl<'a> Chunker<'a> {
    pub fn new(encoding: &'a dyn PayloadEncoding) -> Self {
        Self {
            encoding,
            limits: SegmentLimits::for_encoding(encoding),
        }
    }

    /// Override the encoding's default capacities.
    pub fn with_limits(mut self, limits: SegmentLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn limits(&self) -> SegmentLimits {
        self.limits
    }

    /// Produce every segment for `raw`, head first.
    ///
    /// Fails before producing anything if the id, hash or payload cannot be
    /// encoded, so callers never send a partial payload.
    pub fn segment(
        &self,
        gid: impl Display,
        message_index: u32,
        raw: &str,
        tx_hash: &str,
        network_kind: NetworkKind,
    ) -> Result<Vec<Segment>, CodecError> {
        if raw.is_empty() {
            return Err(CodecError::EmptyPayload);
        }

        let limits = self.limits.validate()?;
        let payload_id = derive_payload_id(gid, message_index, self.encoding)?;
        let tx_hash = self.encoding.encode_hash(tx_hash)?;
        let encoded = self.encoding.encode_payload(raw)?;

        let slices = split_escaped(&encoded, limits)?;
        let count = slices.len() as u32;

        let segments = slices
            .into_iter()
            .enumerate()
            .map(|(seq, slice)| {
                if seq == 0 {
                    Segment::head(payload_id.clone(), slice, count, tx_hash.clone(), network_kind)
                } else {
                    Segment::tail(payload_id.clone(), slice, seq as u32)
                }
            })
            .collect();

        Ok(segments)
    }
}

/// Cut `text` into slices whose JSON-escaped width fits the limits.
pub fn split_escaped(text: &str, limits: SegmentLimits) -> Result<Vec<String>, CodecError> {
    let limits = limits.validate()?;
    let chars: Vec<char> = text.chars().collect();
    let mut slices = Vec::new();
    let mut pos = 0;

    while pos < chars.len() {
        let capacity = if slices.is_empty() { limits.head } else { limits.tail };
        let cut = next_cut(&chars[pos..], capacity);
        slices.push(chars[pos..pos + cut].iter().collect());
        pos += cut;
    }

    if slices.is_empty() {
        slices.push(String::new());
    }
    Ok(slices)
}

/// How many characters of `rest` go into a segment of `capacity`.
///
/// Counts the escape overhead `w` inside the candidate slice and cuts
/// `len - w` characters; the prefix then encodes to at most `len`.
fn next_cut(rest: &[char], capacity: usize) -> usize {
    let candidate = &rest[..rest.len().min(capacity)];
    let overhead: usize = candidate.iter().map(|&c| escape_overhead(c)).sum();

    if candidate.len() + overhead <= capacity {
        return candidate.len();
    }

    let cut = candidate.len().saturating_sub(overhead);
    if cut > 0 {
        return cut;
    }

    // Escape-dense slice: take what fits, at least one character.
    let mut width = 0;
    let mut taken = 0;
    for &c in candidate {
        width += 1 + escape_overhead(c);
        if width > capacity {
            break;
        }
        taken += 1;
    }
    taken.max(1)
}

/// Extra characters a JSON string encoder spends on `c`. Whitespace is
/// always charged one extra character.
fn escape_overhead(c: char) -> usize {
    match c {
        '\n' | '\r' | '\t' | '\u{08}' | '\u{0c}' | '"' | '\\' => 1,
        c if (c as u32) < 0x20 => 5,
        c if c.is_whitespace() => 1,
        _ => 0,
    }
}
