//! txmule-core: segment wire format, chunking, and configuration.
//! All other txmule crates depend on this one.

pub mod chunking;
pub mod config;
pub mod encoding;
pub mod segment;

pub use chunking::{derive_payload_id, segment_count, Chunker, SegmentLimits};
pub use encoding::{CodecError, Identity, PayloadEncoding, Z85};
pub use segment::{MalformedSegment, NetworkKind, Segment, SegmentKind};
