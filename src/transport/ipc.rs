// src/transport/ipc.rs

//! A Unix-domain-socket `IpcTransport` (spec.md §6.3). Each accepted
//! connection gets its own length-delimited-JSON-framed read/write loop;
//! replies are routed back to the right connection through a per-client
//! outbound channel keyed by `ClientId`, since the daemon core only ever
//! addresses clients by that opaque handle. Grounded in the teacher's
//! per-connection `connection_loop.rs`/`spawner.rs` split: one task per
//! connection, a shared table for addressing replies back to it.

use crate::core::dispatcher::{ClientRequest, ClientResponse};
use crate::core::errors::AttrdError;
use crate::core::interfaces::{AckStatus, ClientId, ClientRequestEnvelope, IpcTransport};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, Mutex};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

#[derive(Debug, Serialize, Deserialize)]
struct WireRequest {
    request_id: u64,
    protocol_version: u32,
    request: ClientRequest,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
enum WireAckStatus {
    Ok,
    ProtocolMismatch,
    InvalidInput,
    Error,
}

impl From<AckStatus> for WireAckStatus {
    fn from(status: AckStatus) -> Self {
        match status {
            AckStatus::Ok => WireAckStatus::Ok,
            AckStatus::ProtocolMismatch => WireAckStatus::ProtocolMismatch,
            AckStatus::InvalidInput => WireAckStatus::InvalidInput,
            AckStatus::Error => WireAckStatus::Error,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
enum WireReply {
    Ack { request_id: u64, protocol_version: u32, status: WireAckStatus },
    Response { request_id: u64, payload: ClientResponse },
}

type ClientTable = Arc<Mutex<HashMap<u64, mpsc::UnboundedSender<Bytes>>>>;

/// An IPC server bound to a Unix domain socket. Construction spawns the
/// accept loop; each connection it accepts gets its own read/write task.
pub struct UnixIpcTransport {
    clients: ClientTable,
}

impl UnixIpcTransport {
    pub async fn bind(socket_path: &str) -> anyhow::Result<(Self, mpsc::Receiver<ClientRequestEnvelope>)> {
        let _ = std::fs::remove_file(socket_path);
        let listener = UnixListener::bind(socket_path)?;
        let (requests_tx, requests_rx) = mpsc::channel(256);
        let clients: ClientTable = Arc::new(Mutex::new(HashMap::new()));
        let accept_clients = clients.clone();

        tokio::spawn(async move {
            let mut next_client_id = 0u64;
            loop {
                match listener.accept().await {
                    Ok((stream, _addr)) => {
                        next_client_id += 1;
                        let client_id = ClientId(next_client_id);
                        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
                        accept_clients.lock().await.insert(client_id.0, outbound_tx);
                        tokio::spawn(handle_connection(
                            stream,
                            client_id,
                            requests_tx.clone(),
                            outbound_rx,
                            accept_clients.clone(),
                        ));
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "IPC accept error, stopping listener");
                        break;
                    }
                }
            }
        });

        Ok((Self { clients }, requests_rx))
    }

    async fn send(&self, client: ClientId, reply: &WireReply) -> Result<(), AttrdError> {
        let clients = self.clients.lock().await;
        if let Some(tx) = clients.get(&client.0) {
            let payload = serde_json::to_vec(reply)?;
            let _ = tx.send(payload.into());
        } else {
            tracing::warn!(client = client.0, "dropping reply to unknown/disconnected IPC client");
        }
        Ok(())
    }
}

async fn handle_connection(
    stream: UnixStream,
    client_id: ClientId,
    requests_tx: mpsc::Sender<ClientRequestEnvelope>,
    mut outbound_rx: mpsc::UnboundedReceiver<Bytes>,
    clients: ClientTable,
) {
    let framed = Framed::new(stream, LengthDelimitedCodec::new());
    let (mut sink, mut stream) = framed.split();

    loop {
        tokio::select! {
            outbound = outbound_rx.recv() => {
                match outbound {
                    Some(bytes) => {
                        if sink.send(bytes).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            inbound = stream.next() => {
                match inbound {
                    Some(Ok(bytes)) => match serde_json::from_slice::<WireRequest>(&bytes) {
                        Ok(wire) => {
                            let envelope = ClientRequestEnvelope {
                                client: client_id,
                                request_id: wire.request_id,
                                protocol_version: wire.protocol_version,
                                request: wire.request,
                            };
                            if requests_tx.send(envelope).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => tracing::warn!(error = %e, "dropping malformed IPC request"),
                    },
                    _ => break,
                }
            }
        }
    }

    clients.lock().await.remove(&client_id.0);
}

#[async_trait]
impl IpcTransport for UnixIpcTransport {
    async fn send_ack(
        &mut self,
        client: ClientId,
        request_id: u64,
        protocol_version: u32,
        status: AckStatus,
    ) -> Result<(), AttrdError> {
        self.send(client, &WireReply::Ack { request_id, protocol_version, status: status.into() }).await
    }

    async fn send_response(
        &mut self,
        client: ClientId,
        request_id: u64,
        payload: ClientResponse,
    ) -> Result<(), AttrdError> {
        self.send(client, &WireReply::Response { request_id, payload }).await
    }
}
