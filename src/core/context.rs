// src/core/context.rs

//! `DaemonContext`: owns every component (§2 table A-G) and runs the single
//! cooperative event loop (§5) that multiplexes cluster messages, CIB
//! events, IPC requests, and the shared timer queue. Grounded in the
//! teacher's `main.rs` top-level `tokio::select!` loop, generalized from
//! "one loop per client connection plus background tasks" to "one loop for
//! the whole daemon", per SPEC_FULL.md §9's "fold global state into one
//! context" design note.

use crate::config::Config;
use crate::core::cib_observer::CibObserver;
use crate::core::dispatcher::{self, ClientRequest, ClientResponse, SyncPoint, SyncWaitlist, WaitKey};
use crate::core::election::{Election, ElectionAction, NodePreference};
use crate::core::errors::AttrdError;
use crate::core::interfaces::{
    CibClient, CibEvent, ClientId, ClusterTransport, IpcTransport, Peer, PeerEvent, SendTarget,
};
use crate::core::lifecycle::{self, ShutdownState};
use crate::core::peer::{self, PeerMessage};
use crate::core::store::{AttributeStore, NodeIdentity};
use crate::core::writer::{self, NodeResolver, WriteAllPolicy, WriteDecision, WriterPipeline};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::time::{DelayQueue, delay_queue};

/// The wire envelope carried over `ClusterTransport`: either an attribute
/// gossip message or an election protocol message. Both travel the same
/// broadcast/unicast channel, so inbound messages are tagged once here
/// rather than needing a second transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ClusterWireMessage {
    Attribute(PeerMessage),
    Election(crate::core::election::ElectionMessage),
}

/// What a parked timer entry is for. A single `DelayQueue` multiplexes
/// dampening delays, write retries, the election round timeout, and
/// sync-point wait expiry, rather than each owning a separate
/// `tokio::time::Sleep` (SPEC_FULL.md §9 "pointer graphs" resolution).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TimerKey {
    Dampening(crate::core::store::AttributeId),
    Retry(crate::core::store::AttributeId),
    ElectionRound(u64),
    SyncWait(WaitKey),
}

/// The peer membership view the writer pipeline consults to resolve a
/// node name to its CIB uuid (spec.md §4.D.2). `self_peer` is kept separate
/// from `peers` so this node's own identity resolves like any other peer's
/// without counting toward election quorum or the `peers_known` metric,
/// both of which only care about *other* cluster members.
#[derive(Debug, Default)]
struct PeerRegistry {
    self_peer: Option<Peer>,
    peers: HashMap<String, Peer>,
}

impl PeerRegistry {
    fn upsert(&mut self, peer: Peer) {
        self.peers.insert(peer.name.clone(), peer);
    }

    fn remove(&mut self, name: &str) {
        self.peers.remove(name);
    }
}

impl NodeResolver for PeerRegistry {
    fn resolve(&self, node_name: &str) -> Option<(String, u32)> {
        if let Some(p) = &self.self_peer {
            if p.name == node_name {
                return Some((p.uuid.clone()?, p.id?));
            }
        }
        let peer = self.peers.get(node_name)?;
        Some((peer.uuid.clone()?, peer.id?))
    }
}

/// Owns every component and the channels connecting it to the three
/// external collaborators.
pub struct DaemonContext {
    config: Config,
    node_id: u32,
    store: AttributeStore,
    election: Election,
    writer: WriterPipeline,
    cib_observer: CibObserver,
    shutdown: ShutdownState,
    sync_waitlist: SyncWaitlist,
    peers: PeerRegistry,

    cluster: Box<dyn ClusterTransport>,
    cib: Box<dyn CibClient>,
    ipc: Box<dyn IpcTransport>,

    peer_events: mpsc::Receiver<PeerEvent>,
    cib_events: mpsc::Receiver<CibEvent>,
    client_requests: mpsc::Receiver<crate::core::interfaces::ClientRequestEnvelope>,

    timers: DelayQueue<TimerKey>,
    timer_handles: HashMap<TimerKey, delay_queue::Key>,

    /// When each in-flight CIB write was committed, keyed by its
    /// correlation id, so the completion callback can observe how long the
    /// round trip took (spec.md §9 ambient observability).
    write_started_at: HashMap<u64, std::time::Instant>,

    shutdown_signal: Option<tokio::sync::oneshot::Receiver<()>>,
}

impl DaemonContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Config,
        node_id: u32,
        preference: NodePreference,
        cluster: Box<dyn ClusterTransport>,
        cib: Box<dyn CibClient>,
        ipc: Box<dyn IpcTransport>,
        peer_events: mpsc::Receiver<PeerEvent>,
        cib_events: mpsc::Receiver<CibEvent>,
        client_requests: mpsc::Receiver<crate::core::interfaces::ClientRequestEnvelope>,
        shutdown_signal: tokio::sync::oneshot::Receiver<()>,
    ) -> Self {
        let node_name = config.node_name.clone();
        let write_timeout = config.timing.cib_write_timeout;
        let mut peers = PeerRegistry::default();
        peers.self_peer = Some(Peer {
            name: node_name.clone(),
            id: Some(node_id),
            uuid: Some(config.resolved_node_uuid()),
        });
        Self {
            election: Election::new(node_name, preference),
            writer: WriterPipeline::new(write_timeout),
            cib_observer: CibObserver::new(),
            shutdown: ShutdownState::default(),
            sync_waitlist: SyncWaitlist::new(),
            peers,
            store: AttributeStore::new(),
            config,
            node_id,
            cluster,
            cib,
            ipc,
            peer_events,
            cib_events,
            client_requests,
            timers: DelayQueue::new(),
            timer_handles: HashMap::new(),
            write_started_at: HashMap::new(),
            shutdown_signal: Some(shutdown_signal),
        }
    }

    fn arm_timer(&mut self, key: TimerKey, after: Duration) {
        if let Some(handle) = self.timer_handles.remove(&key) {
            self.timers.remove(&handle);
        }
        let handle = self.timers.insert(key.clone(), after);
        self.timer_handles.insert(key, handle);
    }

    /// §4.D.1: "if `a.timer` is running, return" — a running dampening
    /// window is never restarted by a later update, so the write lands
    /// ~dampening after the *first* update in a burst rather than being
    /// pushed back by every subsequent one.
    fn arm_dampening_if_absent(&mut self, id: crate::core::store::AttributeId, after: Duration) {
        if !self.timer_handles.contains_key(&TimerKey::Dampening(id.clone())) {
            self.arm_timer(TimerKey::Dampening(id), after);
        }
    }

    /// Runs the daemon until shutdown is requested. Mirrors the teacher's
    /// top-level `select!` loop, with one arm per collaborator channel plus
    /// the shared timer queue.
    pub async fn run(&mut self) -> Result<(), AttrdError> {
        use futures::StreamExt;

        lifecycle::startup(self.cib.as_mut(), &self.config.resolved_node_uuid(), self.config.stand_alone).await?;
        self.start_election_round().await?;

        let mut shutdown_signal = self.shutdown_signal.take();
        let mut channels_exhausted = false;

        loop {
            if self.shutdown.is_shutting_down() {
                break;
            }
            tokio::select! {
                Some(event) = self.peer_events.recv() => {
                    self.handle_peer_event(event).await?;
                }
                Some(event) = self.cib_events.recv() => {
                    self.handle_cib_event(event).await?;
                }
                Some(envelope) = self.client_requests.recv() => {
                    self.handle_client_request(envelope).await?;
                }
                Some(expired) = self.timers.next() => {
                    self.handle_timer(expired.into_inner()).await?;
                }
                _ = async {
                    match shutdown_signal.as_mut() {
                        Some(rx) => { let _ = rx.await; }
                        None => std::future::pending::<()>().await,
                    }
                }, if shutdown_signal.is_some() => {
                    tracing::info!("shutdown requested, entering shutdown sequence");
                    shutdown_signal = None;
                    self.shutdown.begin();
                }
                else => {
                    channels_exhausted = true;
                    break;
                }
            }
        }

        lifecycle::shutdown(self.cib.as_mut(), self.config.stand_alone).await?;

        if channels_exhausted && !self.shutdown.is_shutting_down() {
            return Err(AttrdError::FatalClusterDisconnect(
                "all inbound event channels closed".to_string(),
            ));
        }
        Ok(())
    }

    async fn start_election_round(&mut self) -> Result<(), AttrdError> {
        let active: Vec<String> = self.peers.peers.keys().cloned().collect();
        let vote = self.election.start_round(active);
        crate::core::metrics::ELECTIONS_STARTED_TOTAL.inc();
        crate::core::metrics::ELECTION_IN_PROGRESS.set(1.0);
        self.arm_timer(TimerKey::ElectionRound(self.election.current_round()), self.config.timing.election_timeout);
        if self.election.in_progress() {
            let payload = serde_json::to_vec(&ClusterWireMessage::Election(vote))?;
            self.cluster.send(SendTarget::Broadcast, payload.into()).await?;
        } else {
            // Single-peer cluster: `start_round` already resolved to `Won`.
            crate::core::metrics::IS_WRITER.set(1.0);
            crate::core::metrics::ELECTION_IN_PROGRESS.set(0.0);
            self.on_election_won().await?;
        }
        Ok(())
    }

    /// Builds one sync-response message per `(attribute, value)` currently
    /// held and sends it to `target` (spec.md §4.B Sync): triggered on peer
    /// join, on election conclusion, and on certain CIB-replaced events.
    async fn send_full_sync(&mut self, target: SendTarget) -> Result<(), AttrdError> {
        let is_writer = self.election.is_writer();
        let protocol_version = self.config.protocol_version;
        let mut payloads = Vec::new();
        self.store.for_each_attribute(|attr| {
            for value in attr.values.values() {
                let msg = peer::build_sync_response(attr, value, is_writer, protocol_version);
                payloads.push(serde_json::to_vec(&ClusterWireMessage::Attribute(msg)));
            }
        });
        for payload in payloads {
            self.cluster.send(target.clone(), payload?.into()).await?;
        }
        Ok(())
    }

    /// Election is decoupled from writing (spec.md §4.C): winning triggers a
    /// sync of the full local view to every peer, followed by a write of
    /// every attribute.
    async fn on_election_won(&mut self) -> Result<(), AttrdError> {
        self.send_full_sync(SendTarget::Broadcast).await?;
        self.run_write_all(WriteAllPolicy { all: true, skip_shutdown: false, no_delay: true }).await
    }

    /// Feeds one inbound election message into the state machine and acts
    /// on the resulting transition (spec.md §4.C).
    async fn handle_election_message(&mut self, from: Peer, msg: crate::core::election::ElectionMessage) -> Result<(), AttrdError> {
        use crate::core::election::ElectionMessage;
        match msg {
            ElectionMessage::Vote { round, preference } => {
                let active: Vec<String> = self.peers.peers.keys().cloned().collect();
                let action = self.election.on_vote(&from.name, round, preference, active);
                match action {
                    ElectionAction::BroadcastVote(vote) => {
                        crate::core::metrics::ELECTIONS_STARTED_TOTAL.inc();
                        crate::core::metrics::ELECTION_IN_PROGRESS.set(1.0);
                        self.arm_timer(TimerKey::ElectionRound(self.election.current_round()), self.config.timing.election_timeout);
                        let payload = serde_json::to_vec(&ClusterWireMessage::Election(vote))?;
                        self.cluster.send(SendTarget::Broadcast, payload.into()).await?;
                    }
                    ElectionAction::SendNoVote(no_vote) => {
                        crate::core::metrics::ELECTION_IN_PROGRESS.set(0.0);
                        let payload = serde_json::to_vec(&ClusterWireMessage::Election(no_vote))?;
                        self.cluster.send(SendTarget::Peer(from.name.clone()), payload.into()).await?;
                    }
                    ElectionAction::Won | ElectionAction::None => {}
                }
            }
            ElectionMessage::NoVote { round, target } => {
                if target != self.config.node_name {
                    return Ok(());
                }
                if matches!(self.election.on_no_vote(&from.name, round), ElectionAction::Won) {
                    crate::core::metrics::IS_WRITER.set(1.0);
                    crate::core::metrics::ELECTION_IN_PROGRESS.set(0.0);
                    self.on_election_won().await?;
                }
            }
        }
        Ok(())
    }

    async fn handle_peer_event(&mut self, event: PeerEvent) -> Result<(), AttrdError> {
        if self.shutdown.is_shutting_down() {
            return Ok(());
        }
        match event {
            PeerEvent::PeerJoined(p) => {
                let name = p.name.clone();
                self.peers.upsert(p);
                crate::core::metrics::PEERS_KNOWN.set(self.peers.peers.len() as f64);
                self.send_full_sync(SendTarget::Peer(name)).await?;
                if !self.election.in_progress() {
                    self.start_election_round().await?;
                }
            }
            PeerEvent::PeerLeft { name } => {
                self.peers.remove(&name);
                self.store.erase_peer(&name);
                crate::core::metrics::PEERS_KNOWN.set(self.peers.peers.len() as f64);
                crate::core::metrics::ATTRIBUTES_TOTAL.set(self.store.len() as f64);
            }
            PeerEvent::Message { from, payload } => {
                let msg: ClusterWireMessage = match serde_json::from_slice(&payload) {
                    Ok(msg) => msg,
                    Err(e) => {
                        tracing::warn!(peer = %from.name, error = %e, "dropping malformed cluster message");
                        return Ok(());
                    }
                };
                match msg {
                    ClusterWireMessage::Election(em) => self.handle_election_message(from, em).await?,
                    ClusterWireMessage::Attribute(msg) => {
                        if let Err(e) = peer::handle_inbound(msg.clone(), self.config.protocol_version) {
                            tracing::warn!(peer = %from.name, error = %e, "dropping peer message below cluster minimum protocol version");
                            return Ok(());
                        }
                        // spec.md §4.B Sync: a sync response naming its sender as
                        // the writer demotes any local belief of having won —
                        // two nodes can't both be authorized to persist.
                        if matches!(&msg.sync_response, Some(meta) if meta.sender_is_writer) && from.name != self.config.node_name {
                            if self.election.demote_if_won() {
                                tracing::warn!(peer = %from.name, "demoted: peer's sync response claims the writer role");
                                crate::core::metrics::IS_WRITER.set(0.0);
                            }
                        }
                        let node_name = self.config.node_name.clone();
                        match peer::apply(&mut self.store, msg, &node_name) {
                            crate::core::peer::PeerHandleOutcome::Applied(outcome) => {
                                if outcome.value_changed {
                                    self.arm_dampening_if_absent(
                                        outcome.attribute_id,
                                        self.config.timing.default_dampening,
                                    );
                                    crate::core::metrics::ATTRIBUTES_TOTAL.set(self.store.len() as f64);
                                }
                            }
                            crate::core::peer::PeerHandleOutcome::Dropped { correction } => {
                                crate::core::metrics::PEER_MESSAGES_FILTERED_TOTAL.inc();
                                let payload = serde_json::to_vec(&ClusterWireMessage::Attribute(correction))?;
                                self.cluster.send(SendTarget::Peer(from.name.clone()), payload.into()).await?;
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }

    async fn handle_cib_event(&mut self, event: CibEvent) -> Result<(), AttrdError> {
        match event {
            CibEvent::Disconnected => {
                self.cib_observer.handle_disconnect(self.shutdown.is_shutting_down())?;
            }
            CibEvent::Notification(patchset) => {
                let is_full_replacement = patchset.is_full_replacement;
                let outcome = self.cib_observer.handle_patchset(&patchset, self.election.is_writer());
                if self.cib_observer.take_pending_config_read() {
                    tracing::info!("alerts section changed, re-reading configuration");
                }
                if let Some(policy) = outcome.write_all {
                    if is_full_replacement {
                        self.send_full_sync(SendTarget::Broadcast).await?;
                    }
                    self.run_write_all(policy).await?;
                }
            }
            CibEvent::Callback { user_data, result, correlation_id } => {
                if let Some(started) = self.write_started_at.remove(&correlation_id.0) {
                    crate::core::metrics::CIB_WRITE_LATENCY_SECONDS.observe(started.elapsed().as_secs_f64());
                }
                crate::core::metrics::PENDING_WRITES.dec();
                let still_matches = self
                    .store
                    .lookup(&user_data)
                    .map(|attr| attr.values.values().all(|v| v.current == v.requested))
                    .unwrap_or(true);
                let dampening = self.store.lookup(&user_data).map(|attr| attr.dampening).unwrap_or_default();
                let outcome = self.writer.on_complete(&user_data, result, still_matches, dampening);
                let mut settled_all = false;
                let mut retry_backoff = None;
                if let Some(attr) = self.store.lookup_mut(&user_data) {
                    match outcome {
                        writer::WriteOutcome::Settled => {
                            writer::clear_requested(attr);
                            attr.flags.remove(crate::core::store::AttributeFlags::CHANGED);
                            crate::core::metrics::CIB_WRITES_SUCCEEDED_TOTAL.inc();
                            settled_all = true;
                        }
                        writer::WriteOutcome::SettledWithFollowup => {
                            writer::clear_requested(attr);
                            crate::core::metrics::CIB_WRITES_SUCCEEDED_TOTAL.inc();
                        }
                        writer::WriteOutcome::Retry(backoff) => {
                            // The failed write is no longer in flight: clear the
                            // pending marker so `ready()` allows the retry timer
                            // to commit a fresh transaction instead of skipping
                            // forever.
                            attr.pending_write_id = 0;
                            crate::core::metrics::CIB_WRITES_RETRIED_TOTAL.inc();
                            retry_backoff = Some(backoff);
                        }
                    }
                }
                if let Some(backoff) = retry_backoff {
                    self.arm_timer(TimerKey::Retry(user_data.clone()), backoff);
                }
                if settled_all {
                    for (client, request_id) in self.sync_waitlist.drain_all() {
                        self.ipc.send_response(client, request_id, ClientResponse::SyncComplete).await?;
                    }
                }
            }
        }
        Ok(())
    }

    async fn handle_client_request(&mut self, envelope: crate::core::interfaces::ClientRequestEnvelope) -> Result<(), AttrdError> {
        crate::core::metrics::REQUESTS_PROCESSED_TOTAL.inc();
        let check = dispatcher::check_protocol_version(&envelope.request, envelope.protocol_version);
        let status = dispatcher::ack_status_for(&check);
        self.ipc.send_ack(envelope.client, envelope.request_id, envelope.protocol_version, status).await?;
        if check.is_err() {
            return Ok(());
        }

        match envelope.request {
            ClientRequest::Update { .. } | ClientRequest::UpdateBatch { .. } => {
                // spec.md §4.F: a request normalizes to a *sequence* of
                // (attribute-id, value, delay?) tuples — a plain `Update` is
                // just the one-element case, `UpdateBatch` the general one.
                let normalized = dispatcher::normalize_updates(&envelope.request, &self.config.node_name)?;
                let sync_point = normalized.first().and_then(|n| n.sync_point);
                for update in &normalized {
                    let outcome = match self.store.upsert(
                        &update.attribute_id,
                        &update.node,
                        update.value.as_deref(),
                        &update.options,
                    ) {
                        Ok(outcome) => outcome,
                        Err(e) => {
                            self.ipc
                                .send_response(envelope.client, envelope.request_id, ClientResponse::Error(e.to_string()))
                                .await?;
                            return Ok(());
                        }
                    };
                    if outcome.value_changed {
                        crate::core::metrics::ATTRIBUTES_TOTAL.set(self.store.len() as f64);
                        let dampening = update.dampening.unwrap_or(self.config.timing.default_dampening);
                        self.arm_dampening_if_absent(update.attribute_id.clone(), dampening);
                        if let Some(attr) = self.store.lookup(&update.attribute_id) {
                            if !attr.is_private() && !attr.is_stand_alone() {
                                let payload = serde_json::to_vec(&ClusterWireMessage::Attribute(peer::build_update(
                                    attr,
                                    &update.node,
                                    update.value.as_deref(),
                                    self.config.protocol_version,
                                )))?;
                                self.cluster.send(SendTarget::Broadcast, payload.into()).await?;
                            }
                        }
                    }
                }
                for (client, request_id) in self.sync_waitlist.drain_local() {
                    self.ipc.send_response(client, request_id, ClientResponse::SyncComplete).await?;
                }
                if let Some(point) = sync_point {
                    let key = self.sync_waitlist.register(
                        envelope.client,
                        envelope.request_id,
                        point,
                        self.config.timing.sync_timeout,
                    );
                    self.arm_timer(TimerKey::SyncWait(key), self.config.timing.sync_timeout);
                } else {
                    self.ipc.send_response(envelope.client, envelope.request_id, ClientResponse::Updated).await?;
                }
            }
            ClientRequest::Query { attribute_id, node } => {
                let id = attribute_id.into();
                let values = match (self.store.lookup(&id), node) {
                    (Some(attr), Some(n)) => attr
                        .values
                        .get(&n)
                        .map(|v| vec![(n, v.current.clone())])
                        .unwrap_or_default(),
                    (Some(attr), None) => attr
                        .values
                        .iter()
                        .map(|(n, v)| (n.clone(), v.current.clone()))
                        .collect(),
                    (None, _) => Vec::new(),
                };
                self.ipc
                    .send_response(envelope.client, envelope.request_id, ClientResponse::QueryResult { values })
                    .await?;
            }
            ClientRequest::PeerRemove { node } => {
                self.store.erase_peer(&node);
                self.peers.remove(&node);
                crate::core::metrics::ATTRIBUTES_TOTAL.set(self.store.len() as f64);
                self.ipc.send_response(envelope.client, envelope.request_id, ClientResponse::Updated).await?;
            }
            ClientRequest::ClearFailure { resource, operation } => {
                let filter = match (resource.as_deref(), operation.as_deref()) {
                    (Some(r), Some(op)) => crate::core::store::ClearFailureFilter::ResourceOperation(r, op),
                    (Some(r), None) => crate::core::store::ClearFailureFilter::Resource(r),
                    (None, _) => crate::core::store::ClearFailureFilter::AnyResource,
                };
                if let Err(e) = self.store.delete_matching(filter) {
                    self.ipc
                        .send_response(envelope.client, envelope.request_id, ClientResponse::Error(e.to_string()))
                        .await?;
                    return Ok(());
                }
                crate::core::metrics::ATTRIBUTES_TOTAL.set(self.store.len() as f64);
                self.ipc.send_response(envelope.client, envelope.request_id, ClientResponse::Updated).await?;
            }
            ClientRequest::Refresh => {
                self.run_write_all(WriteAllPolicy { all: true, skip_shutdown: false, no_delay: true }).await?;
                self.ipc.send_response(envelope.client, envelope.request_id, ClientResponse::Updated).await?;
            }
            ClientRequest::Sync { sync_point } => {
                let key = self.sync_waitlist.register(
                    envelope.client,
                    envelope.request_id,
                    sync_point,
                    self.config.timing.sync_timeout,
                );
                self.arm_timer(TimerKey::SyncWait(key), self.config.timing.sync_timeout);
                if sync_point == SyncPoint::Local {
                    for (client, request_id) in self.sync_waitlist.drain_local() {
                        self.ipc.send_response(client, request_id, ClientResponse::SyncComplete).await?;
                    }
                }
            }
        }
        Ok(())
    }

    async fn handle_timer(&mut self, key: TimerKey) -> Result<(), AttrdError> {
        self.timer_handles.remove(&key);
        match key {
            TimerKey::Dampening(id) | TimerKey::Retry(id) => {
                self.try_write_one(&id).await?;
            }
            TimerKey::ElectionRound(round) => {
                if round == self.election.current_round() {
                    self.election.on_timeout();
                }
            }
            TimerKey::SyncWait(wait_key) => {
                if let Some((client, request_id)) = self.sync_waitlist.expire(wait_key) {
                    self.ipc
                        .send_response(client, request_id, ClientResponse::Error("sync timed out".to_string()))
                        .await?;
                }
            }
        }
        Ok(())
    }

    async fn try_write_one(&mut self, id: &crate::core::store::AttributeId) -> Result<(), AttrdError> {
        let Some(attr) = self.store.lookup_mut(id) else { return Ok(()) };
        let decision = self.writer.decide(
            attr,
            self.config.stand_alone,
            self.election.is_writer(),
            false,
            true,
            &self.peers,
            self.node_id,
        );
        match decision {
            WriteDecision::Skip => {}
            WriteDecision::DeferToElection => {
                if !self.election.in_progress() {
                    self.start_election_round().await?;
                }
            }
            WriteDecision::Transaction(ops) => {
                self.commit_transaction(id.clone(), ops).await?;
            }
        }
        Ok(())
    }

    async fn commit_transaction(
        &mut self,
        attribute_id: crate::core::store::AttributeId,
        ops: Vec<crate::core::interfaces::CibOp>,
    ) -> Result<(), AttrdError> {
        if let Some(attr) = self.store.lookup_mut(&attribute_id) {
            writer::mark_values_requested(attr);
            // spec.md §4.D.2: clear before submitting so a mutation that
            // arrives while the write is in flight re-sets `CHANGED` and is
            // picked up by the completion callback's followup check, rather
            // than being silently absorbed into the write already underway.
            attr.flags.remove(crate::core::store::AttributeFlags::CHANGED);
            attr.flags.remove(crate::core::store::AttributeFlags::FORCE_WRITE);
        }
        let txn = self.cib.begin_transaction();
        for op in ops {
            self.cib.op(txn, op)?;
        }
        let user = self.store.lookup(&attribute_id).and_then(|a| a.user.clone());
        let correlation_id = self.cib.commit_transaction(txn, user.as_deref()).await?;
        self.cib.register_callback(correlation_id, self.writer.write_timeout(), attribute_id.clone());
        if let Some(attr) = self.store.lookup_mut(&attribute_id) {
            attr.pending_write_id = correlation_id.0;
        }
        self.write_started_at.insert(correlation_id.0, std::time::Instant::now());
        crate::core::metrics::PENDING_WRITES.inc();
        Ok(())
    }

    async fn run_write_all(&mut self, policy: WriteAllPolicy) -> Result<(), AttrdError> {
        let ids: Vec<_> = self
            .store
            .ids()
            .filter(|id| {
                self.store
                    .lookup(id)
                    .map(|a| writer::should_include_in_write_all(a, &policy, self.shutdown.is_shutting_down()))
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        for id in ids {
            self.try_write_one(&id).await?;
        }
        Ok(())
    }
}
