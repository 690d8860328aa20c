// src/transport/cluster.rs

//! A UDP-based `ClusterTransport` (spec.md §6.3). Peer membership is
//! resolved from the statically configured peer list (`config.endpoints.
//! peers`) rather than discovered, which is the simplest faithful stand-in
//! for "peers are supplied by the cluster layer" (spec.md §3) absent a real
//! membership protocol. Grounded in the teacher's gossip transport
//! (`core/cluster/gossip.rs`), which also multiplexes inbound datagrams on
//! one socket and fans them out as typed events over a channel.

use crate::config::PeerEndpoint;
use crate::core::errors::AttrdError;
use crate::core::interfaces::{ClusterTransport, Peer, PeerEvent, SendTarget};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

const INBOUND_BUFFER: usize = 256;
const MAX_DATAGRAM: usize = 65_507;

pub struct UdpClusterTransport {
    socket: Arc<UdpSocket>,
    peer_addrs: HashMap<String, SocketAddr>,
}

impl UdpClusterTransport {
    /// Binds `bind_addr`, registers every statically configured peer,
    /// announces them as joined, and spawns the inbound receive loop.
    /// Returns the transport plus the `PeerEvent` stream the daemon context
    /// multiplexes in its `select!` loop.
    pub async fn bind(
        bind_addr: &str,
        peers: &[PeerEndpoint],
    ) -> anyhow::Result<(Self, mpsc::Receiver<PeerEvent>)> {
        let socket = Arc::new(UdpSocket::bind(bind_addr).await?);
        let (tx, rx) = mpsc::channel(INBOUND_BUFFER);

        let mut peer_addrs = HashMap::new();
        let mut addr_to_peer = HashMap::new();
        for p in peers {
            let addr: SocketAddr = p.addr.parse()?;
            peer_addrs.insert(p.name.clone(), addr);
            addr_to_peer.insert(
                addr,
                Peer {
                    name: p.name.clone(),
                    id: Some(p.id),
                    uuid: Some(p.uuid.clone()),
                },
            );
        }

        for peer in addr_to_peer.values() {
            let _ = tx.send(PeerEvent::PeerJoined(peer.clone())).await;
        }

        let recv_socket = socket.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM];
            loop {
                match recv_socket.recv_from(&mut buf).await {
                    Ok((n, addr)) => {
                        let from = addr_to_peer
                            .get(&addr)
                            .cloned()
                            .unwrap_or_else(|| Peer::new(addr.to_string()));
                        let payload = Bytes::copy_from_slice(&buf[..n]);
                        if tx.send(PeerEvent::Message { from, payload }).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "cluster UDP receive error, stopping inbound loop");
                        break;
                    }
                }
            }
        });

        Ok((Self { socket, peer_addrs }, rx))
    }
}

#[async_trait]
impl ClusterTransport for UdpClusterTransport {
    async fn send(&mut self, target: SendTarget, message: Bytes) -> Result<(), AttrdError> {
        match target {
            SendTarget::Peer(name) => {
                if let Some(addr) = self.peer_addrs.get(&name) {
                    self.socket.send_to(&message, addr).await?;
                } else {
                    tracing::warn!(peer = %name, "dropping message to unknown peer");
                }
            }
            SendTarget::Broadcast => {
                for addr in self.peer_addrs.values() {
                    self.socket.send_to(&message, addr).await?;
                }
            }
        }
        Ok(())
    }
}
