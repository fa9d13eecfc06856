//! UDP stand-in for the mesh radio.
//!
//! Datagram layout: 8-byte big-endian sender gid, then the message bytes.
//! Broadcast goes to every configured peer plus every node heard from.
//! Private sends go to the gid's last seen address, or to the configured
//! peers when the gid has not been heard from yet.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use dashmap::DashMap;
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, mpsc};

use txmule_services::{Delivery, Gid, InboundMessage, SendTarget, Transport, TransportError};

const GID_LEN: usize = 8;
const MAX_DATAGRAM: usize = 2048;

#[derive(Clone)]
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    gid: Gid,
    static_peers: Arc<Vec<SocketAddr>>,
    learned: Arc<DashMap<Gid, SocketAddr>>,
}

impl UdpTransport {
    pub async fn bind(bind: &str, gid: Gid, peers: &[String]) -> Result<Self> {
        let socket = UdpSocket::bind(bind)
            .await
            .with_context(|| format!("failed to bind {bind}"))?;
        let static_peers = peers
            .iter()
            .map(|p| p.parse().with_context(|| format!("bad peer address {p}")))
            .collect::<Result<Vec<SocketAddr>>>()?;
        tracing::info!(addr = %socket.local_addr()?, peers = static_peers.len(), "udp transport bound");
        Ok(Self {
            socket: Arc::new(socket),
            gid,
            static_peers: Arc::new(static_peers),
            learned: Arc::new(DashMap::new()),
        })
    }

    fn frame(&self, payload: &[u8]) -> Bytes {
        let mut buf = BytesMut::with_capacity(GID_LEN + payload.len());
        buf.put_u64(self.gid);
        buf.put_slice(payload);
        buf.freeze()
    }

    /// Read datagrams into `inbound` until shutdown or the receiver drops.
    pub async fn recv_loop(
        self,
        inbound: mpsc::Sender<InboundMessage>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<()> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("udp receiver shutting down");
                    return Ok(());
                }

                result = self.socket.recv_from(&mut buf) => {
                    let (len, from) = match result {
                        Ok(r) => r,
                        Err(e) => {
                            tracing::warn!(error = %e, "recv_from failed");
                            continue;
                        }
                    };
                    let Some(msg) = parse_datagram(&buf[..len]) else {
                        tracing::debug!(%from, len, "runt datagram dropped");
                        continue;
                    };
                    if msg.sender == self.gid {
                        continue;
                    }
                    self.learned.insert(msg.sender, from);
                    tracing::trace!(%from, sender = msg.sender, len, "datagram received");
                    if inbound.send(msg).await.is_err() {
                        return Ok(());
                    }
                }
            }
        }
    }
}

/// The bind address with port 0, for one-shot senders running beside a daemon.
pub fn ephemeral_bind(bind: &str) -> String {
    match bind.parse::<SocketAddr>() {
        Ok(mut addr) => {
            addr.set_port(0);
            addr.to_string()
        }
        Err(_) => "0.0.0.0:0".to_string(),
    }
}

fn parse_datagram(data: &[u8]) -> Option<InboundMessage> {
    if data.len() <= GID_LEN {
        return None;
    }
    let (head, body) = data.split_at(GID_LEN);
    let sender = u64::from_be_bytes(head.try_into().ok()?);
    Some(InboundMessage::new(sender, Bytes::copy_from_slice(body)))
}

#[async_trait]
impl Transport for UdpTransport {
    fn local_gid(&self) -> Gid {
        self.gid
    }

    async fn send(&self, target: SendTarget, payload: Bytes) -> Result<Delivery, TransportError> {
        let frame = self.frame(&payload);
        let addrs: Vec<SocketAddr> = match target {
            SendTarget::Broadcast => {
                let mut addrs: Vec<SocketAddr> = self.static_peers.iter().copied().collect();
                for entry in self.learned.iter() {
                    if !addrs.contains(entry.value()) {
                        addrs.push(*entry.value());
                    }
                }
                addrs
            }
            SendTarget::Private { gid } => match self.learned.get(&gid) {
                Some(entry) => vec![*entry.value()],
                None if !self.static_peers.is_empty() => {
                    tracing::debug!(gid, "gid not heard from, relaying via configured peers");
                    self.static_peers.to_vec()
                }
                None => return Err(TransportError::UnknownPeer(gid)),
            },
        };

        for addr in addrs {
            self.socket.send_to(&frame, addr).await?;
        }
        Ok(Delivery {
            target,
            bytes: payload.len(),
        })
    }
}
