// src/core/dispatcher/mod.rs

//! The request dispatcher (spec.md §4.F): turns IPC client requests into
//! normalized store operations, gates commands against the advertised
//! protocol version, and tracks clients waiting on a sync point ("local" or
//! "all") before they get their final response. Grounded in the teacher's
//! command-table dispatch shape (`core/handler/dispatch.rs`) generalized from
//! "one `Command` enum per Redis verb" to this daemon's command surface, and
//! in `core/blocking.rs`'s waiter-list-with-deadline pattern for the sync
//! waitlist.

use crate::core::errors::AttrdError;
use crate::core::interfaces::{AckStatus, ClientId};
use crate::core::store::SetType;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// The lowest protocol version each command requires. Older peers/clients
/// simply never send the newer commands; this table exists so a client that
/// *does* send one is told precisely why it was rejected rather than failing
/// opaquely downstream.
mod version_floor {
    pub const UPDATE: u32 = 1;
    pub const QUERY: u32 = 1;
    pub const PEER_REMOVE: u32 = 1;
    pub const REFRESH: u32 = 1;
    pub const CLEAR_FAILURE: u32 = 2;
    pub const SYNC: u32 = 3;
    /// spec.md §6.1: protocol v4 adds batch updates.
    pub const UPDATE_BATCH: u32 = 4;
}

/// One IPC client command (spec.md §4.F). `update`/`update-delay`/
/// `update-both` from the spec collapse into one `Update` variant whose
/// `value`/`dampening` fields are independently optional — "delay" sets
/// only `dampening`, "both" sets both, plain `update` sets only `value`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ClientRequest {
    Update {
        attribute_id: String,
        node: Option<String>,
        value: Option<String>,
        dampening: Option<Duration>,
        set_id: Option<String>,
        set_type: Option<SetType>,
        private: bool,
        force_write: bool,
        stand_alone: bool,
        user: Option<String>,
        sync_point: Option<SyncPoint>,
    },
    /// A batch of (attribute-id, value, delay?) tuples sharing one node/set/
    /// flag scope, normalized together and applied in order (spec.md §4.F,
    /// §6.1 — the form protocol v4 adds alongside the single-tuple `Update`).
    UpdateBatch {
        updates: Vec<BatchUpdateEntry>,
        node: Option<String>,
        set_id: Option<String>,
        set_type: Option<SetType>,
        private: bool,
        force_write: bool,
        stand_alone: bool,
        user: Option<String>,
        sync_point: Option<SyncPoint>,
    },
    Query {
        attribute_id: String,
        node: Option<String>,
    },
    PeerRemove {
        node: String,
    },
    ClearFailure {
        resource: Option<String>,
        operation: Option<String>,
    },
    Refresh,
    Sync {
        sync_point: SyncPoint,
    },
}

/// One entry of an `UpdateBatch` request: the (attribute-id, value, delay?)
/// tuple named by spec.md §4.F. Everything else about the write (node,
/// set id, flags) is shared across the whole batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchUpdateEntry {
    pub attribute_id: String,
    pub value: Option<String>,
    pub dampening: Option<Duration>,
}

impl ClientRequest {
    fn required_protocol_version(&self) -> u32 {
        match self {
            ClientRequest::Update { .. } => version_floor::UPDATE,
            ClientRequest::UpdateBatch { .. } => version_floor::UPDATE_BATCH,
            ClientRequest::Query { .. } => version_floor::QUERY,
            ClientRequest::PeerRemove { .. } => version_floor::PEER_REMOVE,
            ClientRequest::Refresh => version_floor::REFRESH,
            ClientRequest::ClearFailure { .. } => version_floor::CLEAR_FAILURE,
            ClientRequest::Sync { .. } => version_floor::SYNC,
        }
    }
}

/// A sync point a client (or a `sync_point` on an update) can wait for:
/// this node has locally applied the update, or the elected writer has
/// confirmed the CIB write completed (spec.md §4.F).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncPoint {
    Local,
    All,
}

/// The reply payload for a completed request (spec.md §6.3). Acks (just a
/// status) go over `IpcTransport::send_ack`; this is the follow-up response
/// body for requests that produce one (queries, and sync-point waits).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ClientResponse {
    Updated,
    QueryResult { values: Vec<(String, Option<String>)> },
    SyncComplete,
    Error(String),
}

/// A normalized update, ready to hand to `AttributeStore::upsert` plus
/// whatever dampening timer it requires. Produced by `normalize_updates` so
/// the store and writer layers never need to know about `ClientRequest`'s
/// three update flavors.
#[derive(Debug, Clone)]
pub struct NormalizedUpdate {
    pub attribute_id: crate::core::store::AttributeId,
    pub node: crate::core::store::NodeIdentity,
    pub value: Option<String>,
    pub dampening: Option<Duration>,
    pub options: crate::core::store::UpsertOptions,
    pub sync_point: Option<SyncPoint>,
}

/// Checks `request` against the advertised `protocol_version`, the way
/// every command is gated before normalization (spec.md §6.1).
pub fn check_protocol_version(request: &ClientRequest, protocol_version: u32) -> Result<(), AttrdError> {
    let required = request.required_protocol_version();
    if protocol_version < required {
        return Err(AttrdError::ProtocolMismatch {
            required,
            minimum: protocol_version,
        });
    }
    Ok(())
}

/// Normalizes an `Update` or `UpdateBatch` request into the sequence of
/// `(attribute_id, node, value, delay)` tuples the store layer understands
/// (spec.md §4.F: "normalized to a sequence of (attribute-id, value, delay?)
/// tuples" — a plain `Update` is just the one-element case). Errors on
/// anything but those two variants.
pub fn normalize_updates(
    request: &ClientRequest,
    local_node: &str,
) -> Result<Vec<NormalizedUpdate>, AttrdError> {
    match request {
        ClientRequest::Update {
            attribute_id,
            node,
            value,
            dampening,
            set_id,
            set_type,
            private,
            force_write,
            stand_alone,
            user,
            sync_point,
        } => Ok(vec![NormalizedUpdate {
            attribute_id: attribute_id.clone().into(),
            node: crate::core::store::NodeIdentity::named(node.clone().unwrap_or_else(|| local_node.to_string())),
            value: value.clone(),
            dampening: *dampening,
            options: crate::core::store::UpsertOptions {
                force_write: *force_write,
                stand_alone: *stand_alone,
                private: *private,
                set_id: set_id.clone(),
                set_type: *set_type,
                dampening: *dampening,
                user: user.clone(),
            },
            sync_point: *sync_point,
        }]),
        ClientRequest::UpdateBatch {
            updates,
            node,
            set_id,
            set_type,
            private,
            force_write,
            stand_alone,
            user,
            sync_point,
        } => {
            let node_identity =
                crate::core::store::NodeIdentity::named(node.clone().unwrap_or_else(|| local_node.to_string()));
            Ok(updates
                .iter()
                .map(|entry| NormalizedUpdate {
                    attribute_id: entry.attribute_id.clone().into(),
                    node: node_identity.clone(),
                    value: entry.value.clone(),
                    dampening: entry.dampening,
                    options: crate::core::store::UpsertOptions {
                        force_write: *force_write,
                        stand_alone: *stand_alone,
                        private: *private,
                        set_id: set_id.clone(),
                        set_type: *set_type,
                        dampening: entry.dampening,
                        user: user.clone(),
                    },
                    sync_point: *sync_point,
                })
                .collect())
        }
        other => Err(AttrdError::InvalidInput(format!(
            "not an update request: {other:?}"
        ))),
    }
}

/// One client waiting on a sync point, with the deadline after which the
/// dispatcher gives up and reports timeout rather than waiting forever
/// (spec.md §4.F / §7 `Timeout`).
#[derive(Debug, Clone)]
struct SyncWaiter {
    client: ClientId,
    request_id: u64,
    sync_point: SyncPoint,
    deadline: Instant,
}

/// An opaque key identifying one registered wait, minted by the dispatcher
/// and handed to the caller to park in the shared timer queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WaitKey(u64);

/// Tracks clients waiting on a `local` or `all` sync point. The dispatcher
/// itself holds no timer; the caller registers `deadline` against whatever
/// shared timer source it uses and calls `expire` when it fires.
#[derive(Debug, Default)]
pub struct SyncWaitlist {
    next_key: u64,
    waiters: HashMap<WaitKey, SyncWaiter>,
}

impl SyncWaitlist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        client: ClientId,
        request_id: u64,
        sync_point: SyncPoint,
        timeout: Duration,
    ) -> WaitKey {
        self.next_key += 1;
        let key = WaitKey(self.next_key);
        self.waiters.insert(
            key,
            SyncWaiter {
                client,
                request_id,
                sync_point,
                deadline: Instant::now() + timeout,
            },
        );
        key
    }

    /// Called when the local store has applied an update: resolves every
    /// `Local`-scoped waiter, leaving `All`-scoped waiters parked.
    pub fn drain_local(&mut self) -> Vec<(ClientId, u64)> {
        self.drain_matching(SyncPoint::Local)
    }

    /// Called when the writer pipeline confirms a CIB write completed:
    /// resolves every `All`-scoped waiter.
    pub fn drain_all(&mut self) -> Vec<(ClientId, u64)> {
        self.drain_matching(SyncPoint::All)
    }

    fn drain_matching(&mut self, point: SyncPoint) -> Vec<(ClientId, u64)> {
        let ready: Vec<WaitKey> = self
            .waiters
            .iter()
            .filter(|(_, w)| w.sync_point == point)
            .map(|(k, _)| *k)
            .collect();
        ready
            .into_iter()
            .filter_map(|k| self.waiters.remove(&k))
            .map(|w| (w.client, w.request_id))
            .collect()
    }

    /// Removes and returns the waiter for `key`, if it timed out before its
    /// sync point arrived.
    pub fn expire(&mut self, key: WaitKey) -> Option<(ClientId, u64)> {
        self.waiters.remove(&key).map(|w| (w.client, w.request_id))
    }

    pub fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }
}

/// Maps a result into the ack status the IPC layer sends back immediately
/// on receipt, ahead of any sync-point follow-up (spec.md §6.3/§7).
pub fn ack_status_for(result: &Result<(), AttrdError>) -> AckStatus {
    match result {
        Ok(()) => AckStatus::Ok,
        Err(AttrdError::ProtocolMismatch { .. }) => AckStatus::ProtocolMismatch,
        Err(AttrdError::InvalidInput(_)) => AckStatus::InvalidInput,
        Err(_) => AckStatus::Error,
    }
}
