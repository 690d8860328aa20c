// src/core/interfaces.rs

//! The three external collaborator interfaces (spec.md §6.3): cluster
//! messaging, the CIB client, and the IPC server. Everything outside the
//! core — wire serialization, transport, the CIB's own storage model — is
//! named only at these boundaries, the way the teacher isolates itself from
//! transport specifics behind `ClusterMessaging`-shaped trait objects.

use crate::core::store::AttributeId;
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

/// Cluster node identity, as supplied by the cluster layer. The attribute
/// store never owns these (spec.md §3); the writer pipeline and peer
/// protocol borrow them to resolve a `Value`'s node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub name: String,
    pub id: Option<u32>,
    pub uuid: Option<String>,
}

impl Peer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: None,
            uuid: None,
        }
    }
}

/// Where an outbound cluster message goes.
#[derive(Debug, Clone)]
pub enum SendTarget {
    Peer(String),
    Broadcast,
}

/// Inbound events from the cluster messaging layer: a message, or a change
/// in peer membership/reachability.
#[derive(Debug, Clone)]
pub enum PeerEvent {
    Message { from: Peer, payload: Bytes },
    PeerJoined(Peer),
    PeerLeft { name: String },
}

/// `send`/`on_message`/`on_peer_change` from spec.md §6.3. Inbound events
/// are not a callback registration but a channel handed to the daemon at
/// construction time — `on_message`/`on_peer_change` collapse into the one
/// `PeerEvent` stream the context already needs to multiplex in its
/// `select!` loop.
#[async_trait]
pub trait ClusterTransport: Send {
    async fn send(&mut self, target: SendTarget, message: Bytes) -> Result<(), crate::core::errors::AttrdError>;
}

/// A CIB transaction handle. Opaque beyond equality/ordering; the real
/// client mints these however its RPC layer wants to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionId(pub u64);

/// A CIB correlation id, returned by `commit_transaction`/`remove_xpath` and
/// echoed back on the completion callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CorrelationId(pub u64);

/// The two operation kinds the writer pipeline emits into a transaction
/// (spec.md §4.D.2): set an nv-pair, or delete one by xpath.
#[derive(Debug, Clone)]
pub enum CibOp {
    Update {
        set_id: String,
        set_type: crate::core::store::SetType,
        node_uuid: String,
        attribute_id: AttributeId,
        value: String,
    },
    XpathDelete {
        set_id: String,
        set_type: crate::core::store::SetType,
        node_uuid: String,
        attribute_id: AttributeId,
    },
}

/// The outcome reported by a CIB write's completion callback (spec.md
/// §4.D.4 and §7).
#[derive(Debug, Clone)]
pub enum CibResult {
    Success,
    Transient(String),
    Fatal(String),
    Timeout,
}

impl CibResult {
    pub fn is_success(&self) -> bool {
        matches!(self, CibResult::Success)
    }
}

/// Which part of the CIB a patchset notification touched (spec.md §4.E).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CibSection {
    Alerts,
    NodeOrStatus,
    Other,
}

/// Who produced a CIB change, needed to tell an "unsafe external edit" apart
/// from this daemon's own writes or the controller's (spec.md §4.E).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOrigin {
    ThisDaemon,
    Controller,
    OtherClient,
}

/// A CIB change notification (spec.md §4.E "patchset").
#[derive(Debug, Clone)]
pub struct CibPatchset {
    pub sections: Vec<CibSection>,
    pub origin: ChangeOrigin,
    pub is_full_replacement: bool,
}

/// Inbound events from the CIB client: a write's completion callback, a
/// change notification, or loss of connection.
#[derive(Debug, Clone)]
pub enum CibEvent {
    Callback {
        correlation_id: CorrelationId,
        user_data: AttributeId,
        result: CibResult,
    },
    Notification(CibPatchset),
    Disconnected,
}

/// `connect`/`disconnect`/`begin_transaction`/`op`/`commit_transaction`/
/// `register_callback`/`remove_xpath` from spec.md §6.3. `on_disconnect`/
/// `on_change` collapse into the `CibEvent` stream for the same reason as
/// `ClusterTransport` above.
#[async_trait]
pub trait CibClient: Send {
    async fn connect(&mut self) -> Result<(), crate::core::errors::AttrdError>;
    async fn disconnect(&mut self) -> Result<(), crate::core::errors::AttrdError>;
    fn begin_transaction(&mut self) -> TransactionId;
    fn op(&mut self, txn: TransactionId, op: CibOp) -> Result<(), crate::core::errors::AttrdError>;
    async fn commit_transaction(
        &mut self,
        txn: TransactionId,
        user: Option<&str>,
    ) -> Result<CorrelationId, crate::core::errors::AttrdError>;
    fn register_callback(&mut self, correlation_id: CorrelationId, timeout: Duration, user_data: AttributeId);
    async fn remove_xpath(&mut self, path: String) -> Result<CorrelationId, crate::core::errors::AttrdError>;
}

/// Opaque client handle for the IPC server, stable across a client's
/// connection lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(pub u64);

/// The daemon's reply status to an acked request (spec.md §6.3/§7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckStatus {
    Ok,
    ProtocolMismatch,
    InvalidInput,
    Error,
}

/// One client request, as delivered by the IPC transport, tagged with the
/// sender's advertised protocol version (spec.md §6.1).
#[derive(Debug, Clone)]
pub struct ClientRequestEnvelope {
    pub client: ClientId,
    pub request_id: u64,
    pub protocol_version: u32,
    pub request: crate::core::dispatcher::ClientRequest,
}

/// `on_client_request`/`send_ack`/`send_response` from spec.md §6.3.
/// Inbound requests arrive on a channel for the same reason as the other
/// two collaborators.
#[async_trait]
pub trait IpcTransport: Send {
    async fn send_ack(
        &mut self,
        client: ClientId,
        request_id: u64,
        protocol_version: u32,
        status: AckStatus,
    ) -> Result<(), crate::core::errors::AttrdError>;
    async fn send_response(
        &mut self,
        client: ClientId,
        request_id: u64,
        payload: crate::core::dispatcher::ClientResponse,
    ) -> Result<(), crate::core::errors::AttrdError>;
}
