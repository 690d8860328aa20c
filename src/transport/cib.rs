// src/transport/cib.rs

//! A length-delimited, JSON-framed `CibClient` (spec.md §6.3). The CIB's own
//! wire format (XML) and storage model are explicitly out of scope
//! (spec.md §1 Non-goals); this client only needs *a* transport to carry
//! the five operations the writer pipeline actually issues
//! (begin/op/commit/register_callback/remove_xpath), so it reuses the same
//! length-delimited-JSON choice made for the cluster and IPC transports
//! (DESIGN.md's wire-encoding decision). Grounded in the teacher's
//! `WardenClient` (`core/warden/client.rs`): a small async TCP client with
//! its own read loop and per-request timeout.

use crate::core::errors::AttrdError;
use crate::core::interfaces::{CibClient, CibEvent, CibOp, CibResult, CorrelationId, TransactionId};
use crate::core::store::{AttributeId, SetType};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

#[derive(Debug, Clone, Serialize, Deserialize)]
enum WireOp {
    Update {
        set_id: String,
        set_type: SetType,
        node_uuid: String,
        attribute_id: String,
        value: String,
    },
    XpathDelete {
        set_id: String,
        set_type: SetType,
        node_uuid: String,
        attribute_id: String,
    },
}

impl From<&CibOp> for WireOp {
    fn from(op: &CibOp) -> Self {
        match op {
            CibOp::Update { set_id, set_type, node_uuid, attribute_id, value } => WireOp::Update {
                set_id: set_id.clone(),
                set_type: *set_type,
                node_uuid: node_uuid.clone(),
                attribute_id: attribute_id.to_string(),
                value: value.clone(),
            },
            CibOp::XpathDelete { set_id, set_type, node_uuid, attribute_id } => WireOp::XpathDelete {
                set_id: set_id.clone(),
                set_type: *set_type,
                node_uuid: node_uuid.clone(),
                attribute_id: attribute_id.to_string(),
            },
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
enum CibWireRequest {
    Commit { correlation_id: u64, ops: Vec<WireOp>, user: Option<String> },
    RemoveXpath { correlation_id: u64, path: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum WireResult {
    Success,
    Transient(String),
    Fatal(String),
}

impl From<WireResult> for CibResult {
    fn from(w: WireResult) -> Self {
        match w {
            WireResult::Success => CibResult::Success,
            WireResult::Transient(s) => CibResult::Transient(s),
            WireResult::Fatal(s) => CibResult::Fatal(s),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CibWireResponse {
    correlation_id: u64,
    result: WireResult,
}

type ResultWaiters = Arc<Mutex<HashMap<u64, oneshot::Sender<CibResult>>>>;

/// A CIB client reached over TCP. `connect()` spawns one task that owns the
/// socket's read and write halves; `op`/`begin_transaction` are purely
/// local bookkeeping (the transaction only hits the wire on commit).
pub struct TcpCibClient {
    addr: String,
    writer: Option<mpsc::UnboundedSender<Bytes>>,
    next_correlation: u64,
    next_txn: u64,
    pending_ops: HashMap<u64, Vec<CibOp>>,
    events_tx: mpsc::Sender<CibEvent>,
    waiters: ResultWaiters,
}

impl TcpCibClient {
    pub fn new(addr: impl Into<String>) -> (Self, mpsc::Receiver<CibEvent>) {
        let (events_tx, events_rx) = mpsc::channel(128);
        (
            Self {
                addr: addr.into(),
                writer: None,
                next_correlation: 0,
                next_txn: 0,
                pending_ops: HashMap::new(),
                events_tx,
                waiters: Arc::new(Mutex::new(HashMap::new())),
            },
            events_rx,
        )
    }

    fn next_correlation_id(&mut self) -> u64 {
        self.next_correlation += 1;
        self.next_correlation
    }

    fn send_frame(&self, frame: &CibWireRequest) -> Result<(), AttrdError> {
        let Some(writer) = &self.writer else {
            return Err(AttrdError::FatalCibDisconnect("not connected".to_string()));
        };
        let payload = serde_json::to_vec(frame)?;
        writer
            .send(payload.into())
            .map_err(|_| AttrdError::FatalCibDisconnect("CIB write channel closed".to_string()))
    }
}

#[async_trait]
impl CibClient for TcpCibClient {
    async fn connect(&mut self) -> Result<(), AttrdError> {
        let stream = TcpStream::connect(&self.addr).await?;
        let framed = Framed::new(stream, LengthDelimitedCodec::new());
        let (mut sink, mut stream) = framed.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();
        self.writer = Some(tx);

        let events_tx = self.events_tx.clone();
        let waiters = self.waiters.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    outbound = rx.recv() => {
                        match outbound {
                            Some(bytes) => {
                                if sink.send(bytes).await.is_err() {
                                    let _ = events_tx.send(CibEvent::Disconnected).await;
                                    break;
                                }
                            }
                            None => break,
                        }
                    }
                    inbound = stream.next() => {
                        match inbound {
                            Some(Ok(bytes)) => {
                                if let Ok(resp) = serde_json::from_slice::<CibWireResponse>(&bytes) {
                                    let waiter = waiters.lock().unwrap().remove(&resp.correlation_id);
                                    if let Some(tx) = waiter {
                                        let _ = tx.send(resp.result.into());
                                    }
                                }
                            }
                            _ => {
                                let _ = events_tx.send(CibEvent::Disconnected).await;
                                break;
                            }
                        }
                    }
                }
            }
        });
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), AttrdError> {
        self.writer = None;
        Ok(())
    }

    fn begin_transaction(&mut self) -> TransactionId {
        self.next_txn += 1;
        let id = self.next_txn;
        self.pending_ops.insert(id, Vec::new());
        TransactionId(id)
    }

    fn op(&mut self, txn: TransactionId, op: CibOp) -> Result<(), AttrdError> {
        self.pending_ops.entry(txn.0).or_default().push(op);
        Ok(())
    }

    async fn commit_transaction(
        &mut self,
        txn: TransactionId,
        user: Option<&str>,
    ) -> Result<CorrelationId, AttrdError> {
        let ops = self.pending_ops.remove(&txn.0).unwrap_or_default();
        let wire_ops: Vec<WireOp> = ops.iter().map(WireOp::from).collect();
        let correlation_id = self.next_correlation_id();
        self.send_frame(&CibWireRequest::Commit {
            correlation_id,
            ops: wire_ops,
            user: user.map(str::to_string),
        })?;
        Ok(CorrelationId(correlation_id))
    }

    fn register_callback(&mut self, correlation_id: CorrelationId, timeout: Duration, user_data: AttributeId) {
        let (result_tx, result_rx) = oneshot::channel();
        self.waiters.lock().unwrap().insert(correlation_id.0, result_tx);
        let events_tx = self.events_tx.clone();
        tokio::spawn(async move {
            let result = match tokio::time::timeout(timeout, result_rx).await {
                Ok(Ok(r)) => r,
                _ => CibResult::Timeout,
            };
            let _ = events_tx.send(CibEvent::Callback { correlation_id, user_data, result }).await;
        });
    }

    async fn remove_xpath(&mut self, path: String) -> Result<CorrelationId, AttrdError> {
        let correlation_id = self.next_correlation_id();
        self.send_frame(&CibWireRequest::RemoveXpath { correlation_id, path })?;
        Ok(CorrelationId(correlation_id))
    }
}
