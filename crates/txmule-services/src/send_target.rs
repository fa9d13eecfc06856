//! Send targeting: mesh broadcast vs private delivery to one node.

use bytes::Bytes;

/// Mesh node identifier (48-bit goTenna GID in practice).
pub type Gid = u64;

/// Where an outbound message goes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SendTarget {
    /// Every reachable node.
    #[default]
    Broadcast,

    /// A single node by gid.
    Private { gid: Gid },
}

/// A message handed up by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub sender: Gid,
    pub payload: Bytes,
}

impl InboundMessage {
    pub fn new(sender: Gid, payload: impl Into<Bytes>) -> Self {
        Self {
            sender,
            payload: payload.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_target_is_broadcast() {
        assert_eq!(SendTarget::default(), SendTarget::Broadcast);
        assert_ne!(SendTarget::Private { gid: 555 }, SendTarget::Private { gid: 556 });
    }

    #[test]
    fn inbound_message_accepts_static_bytes() {
        let msg = InboundMessage::new(7, &b"{}"[..]);
        assert_eq!(msg.sender, 7);
        assert_eq!(&msg.payload[..], b"{}");
    }
}
