//! Payload encodings: the pre-encode step applied before chunking.
//!
//! `Identity` sends the raw string as-is. `Z85` packs it into the ZeroMQ
//! base-85 alphabet (RFC 32), which buys the head segment 24 extra
//! characters and shortens the transaction hash from 64 to 40 characters.
//! Neither alphabet contains characters that JSON has to escape.

/// Head-segment capacity for plain payloads, in characters.
pub const HEAD_CAPACITY: usize = 100;

/// Head-segment capacity when the Z85 encoding is used.
pub const HEAD_CAPACITY_Z85: usize = HEAD_CAPACITY + 24;

/// Tail-segment capacity, in characters.
pub const TAIL_CAPACITY: usize = 180;

/// Strategy selected at encode time.
pub trait PayloadEncoding: Send + Sync {
    /// Name used in configuration files.
    fn name(&self) -> &'static str;

    /// How many payload characters fit in the head segment.
    fn head_capacity(&self) -> usize;

    /// How many payload characters fit in each tail segment.
    fn tail_capacity(&self) -> usize {
        TAIL_CAPACITY
    }

    fn encode_payload(&self, raw: &str) -> Result<String, CodecError>;

    fn decode_payload(&self, encoded: &str) -> Result<String, CodecError>;

    /// Render the 8 identifier bytes as a wire `payload_id`.
    fn encode_id(&self, id: &[u8; 8]) -> Result<String, CodecError>;

    /// Render a hex transaction/content hash for the head segment.
    fn encode_hash(&self, tx_hash: &str) -> Result<String, CodecError>;

    /// Inverse of `encode_hash`: back to lowercase hex.
    fn decode_hash(&self, encoded: &str) -> Result<String, CodecError>;
}

/// Look up an encoding by its configuration name.
pub fn by_name(name: &str) -> Option<&'static dyn PayloadEncoding> {
    match name {
        "identity" | "plain" => Some(&Identity),
        "z85" => Some(&Z85),
        _ => None,
    }
}

// ── Identity ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl PayloadEncoding for Identity {
    fn name(&self) -> &'static str {
        "identity"
    }

    fn head_capacity(&self) -> usize {
        HEAD_CAPACITY
    }

    fn encode_payload(&self, raw: &str) -> Result<String, CodecError> {
        Ok(raw.to_string())
    }

    fn decode_payload(&self, encoded: &str) -> Result<String, CodecError> {
        Ok(encoded.to_string())
    }

    fn encode_id(&self, id: &[u8; 8]) -> Result<String, CodecError> {
        Ok(hex::encode(id))
    }

    fn encode_hash(&self, tx_hash: &str) -> Result<String, CodecError> {
        Ok(tx_hash.to_string())
    }

    fn decode_hash(&self, encoded: &str) -> Result<String, CodecError> {
        Ok(encoded.to_string())
    }
}

// ── Z85 ───────────────────────────────────────────────────────────────────────

const Z85_ALPHABET: &[u8; 85] =
    b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ.-:+=^!/*?&<>()[]{}@%$#";

#[derive(Debug, Clone, Copy, Default)]
pub struct Z85;

impl PayloadEncoding for Z85 {
    fn name(&self) -> &'static str {
        "z85"
    }

    fn head_capacity(&self) -> usize {
        HEAD_CAPACITY_Z85
    }

    fn encode_payload(&self, raw: &str) -> Result<String, CodecError> {
        z85_encode(raw.as_bytes())
    }

    fn decode_payload(&self, encoded: &str) -> Result<String, CodecError> {
        let bytes = z85_decode(encoded)?;
        String::from_utf8(bytes)
            .map_err(|_| CodecError::Encoding("decoded payload is not UTF-8".into()))
    }

    fn encode_id(&self, id: &[u8; 8]) -> Result<String, CodecError> {
        z85_encode(hex::encode(id).as_bytes())
    }

    fn encode_hash(&self, tx_hash: &str) -> Result<String, CodecError> {
        let bytes = hex::decode(tx_hash).map_err(|e| CodecError::InvalidHash(e.to_string()))?;
        z85_encode(&bytes)
    }

    fn decode_hash(&self, encoded: &str) -> Result<String, CodecError> {
        z85_decode(encoded).map(hex::encode)
    }
}

/// Encode bytes as Z85. Input length must be a multiple of 4.
pub fn z85_encode(data: &[u8]) -> Result<String, CodecError> {
    if data.len() % 4 != 0 {
        return Err(CodecError::Encoding(format!(
            "z85 input length {} is not a multiple of 4",
            data.len()
        )));
    }

    let mut out = String::with_capacity(data.len() / 4 * 5);
    for word in data.chunks_exact(4) {
        let mut value = u32::from_be_bytes([word[0], word[1], word[2], word[3]]);
        let mut block = [0u8; 5];
        for slot in block.iter_mut().rev() {
            *slot = Z85_ALPHABET[(value % 85) as usize];
            value /= 85;
        }
        out.extend(block.iter().map(|&b| b as char));
    }
    Ok(out)
}

/// Decode a Z85 string. Input length must be a multiple of 5.
pub fn z85_decode(text: &str) -> Result<Vec<u8>, CodecError> {
    let bytes = text.as_bytes();
    if bytes.len() % 5 != 0 {
        return Err(CodecError::Encoding(format!(
            "z85 text length {} is not a multiple of 5",
            bytes.len()
        )));
    }

    let mut out = Vec::with_capacity(bytes.len() / 5 * 4);
    for block in bytes.chunks_exact(5) {
        let mut value: u64 = 0;
        for &c in block {
            let digit = Z85_ALPHABET
                .iter()
                .position(|&a| a == c)
                .ok_or_else(|| CodecError::Encoding(format!("invalid z85 character {:?}", c as char)))?;
            value = value * 85 + digit as u64;
        }
        let value = u32::try_from(value)
            .map_err(|_| CodecError::Encoding("z85 block overflows 32 bits".into()))?;
        out.extend_from_slice(&value.to_be_bytes());
    }
    Ok(out)
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Failure to turn a raw payload into segments. Nothing is sent.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("encoding failed: {0}")]
    Encoding(String),

    #[error("transaction hash is not valid hex: {0}")]
    InvalidHash(String),

    #[error("payload is empty")]
    EmptyPayload,

    #[error("segment capacities {head}/{tail} below the minimum of {min}")]
    InvalidLimits { head: usize, tail: usize, min: usize },
}
