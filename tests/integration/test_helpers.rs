// tests/integration/test_helpers.rs

//! Fake collaborators and a small harness for driving a `DaemonContext`
//! end-to-end without a real cluster socket, CIB, or IPC listener.

use async_trait::async_trait;
use bytes::Bytes;
use clattrd::config::Config;
use clattrd::core::context::DaemonContext;
use clattrd::core::election::NodePreference;
use clattrd::core::errors::AttrdError;
use clattrd::core::interfaces::{
    AckStatus, CibClient, CibEvent, CibOp, CibResult, ClientId, ClientRequestEnvelope,
    ClusterTransport, CorrelationId, IpcTransport, PeerEvent, SendTarget, TransactionId,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// One recorded reply the daemon sent back over the fake IPC transport.
#[derive(Debug, Clone)]
pub enum Recorded {
    Ack { request_id: u64, protocol_version: u32, status: AckStatus },
    Response { request_id: u64, payload: clattrd::core::dispatcher::ClientResponse },
}

#[derive(Default)]
struct Shared {
    cluster_sent: Vec<(SendTarget, Bytes)>,
    ipc_replies: HashMap<u64, Vec<Recorded>>,
    committed: Vec<(CorrelationId, Vec<CibOp>)>,
}

/// Records every outbound broadcast/unicast instead of putting anything on
/// the wire.
pub struct FakeClusterTransport {
    shared: Arc<Mutex<Shared>>,
}

#[async_trait]
impl ClusterTransport for FakeClusterTransport {
    async fn send(&mut self, target: SendTarget, message: Bytes) -> Result<(), AttrdError> {
        self.shared.lock().unwrap().cluster_sent.push((target, message));
        Ok(())
    }
}

/// A `CibClient` that never touches a real CIB: transactions are assembled
/// in memory and, once `register_callback` is called, a completion event is
/// pushed back onto `cib_events_tx` with the next queued outcome (`Success`
/// unless the test queues something else).
pub struct FakeCibClient {
    shared: Arc<Mutex<Shared>>,
    next_txn: AtomicU64,
    next_correlation: AtomicU64,
    pending_ops: HashMap<u64, Vec<CibOp>>,
    cib_events_tx: mpsc::Sender<CibEvent>,
    outcomes: Arc<Mutex<VecDeque<CibResult>>>,
}

#[async_trait]
impl CibClient for FakeCibClient {
    async fn connect(&mut self) -> Result<(), AttrdError> {
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), AttrdError> {
        Ok(())
    }

    fn begin_transaction(&mut self) -> TransactionId {
        let id = self.next_txn.fetch_add(1, Ordering::SeqCst);
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
        _user: Option<&str>,
    ) -> Result<CorrelationId, AttrdError> {
        let ops = self.pending_ops.remove(&txn.0).unwrap_or_default();
        let correlation_id = CorrelationId(self.next_correlation.fetch_add(1, Ordering::SeqCst));
        self.shared.lock().unwrap().committed.push((correlation_id, ops));
        Ok(correlation_id)
    }

    fn register_callback(&mut self, correlation_id: CorrelationId, _timeout: Duration, user_data: clattrd::core::store::AttributeId) {
        let result = self.outcomes.lock().unwrap().pop_front().unwrap_or(CibResult::Success);
        let tx = self.cib_events_tx.clone();
        tokio::spawn(async move {
            let _ = tx.send(CibEvent::Callback { correlation_id, user_data, result }).await;
        });
    }

    async fn remove_xpath(&mut self, _path: String) -> Result<CorrelationId, AttrdError> {
        Ok(CorrelationId(self.next_correlation.fetch_add(1, Ordering::SeqCst)))
    }
}

pub struct FakeIpcTransport {
    shared: Arc<Mutex<Shared>>,
}

#[async_trait]
impl IpcTransport for FakeIpcTransport {
    async fn send_ack(
        &mut self,
        client: ClientId,
        request_id: u64,
        protocol_version: u32,
        status: AckStatus,
    ) -> Result<(), AttrdError> {
        self.shared
            .lock()
            .unwrap()
            .ipc_replies
            .entry(client.0)
            .or_default()
            .push(Recorded::Ack { request_id, protocol_version, status });
        Ok(())
    }

    async fn send_response(
        &mut self,
        client: ClientId,
        request_id: u64,
        payload: clattrd::core::dispatcher::ClientResponse,
    ) -> Result<(), AttrdError> {
        self.shared
            .lock()
            .unwrap()
            .ipc_replies
            .entry(client.0)
            .or_default()
            .push(Recorded::Response { request_id, payload });
        Ok(())
    }
}

/// Everything a test needs to drive a running `DaemonContext` and observe
/// what it did, without a real cluster, CIB, or IPC socket underneath it.
pub struct TestHarness {
    pub peer_tx: mpsc::Sender<PeerEvent>,
    pub cib_tx: mpsc::Sender<CibEvent>,
    pub client_tx: mpsc::Sender<ClientRequestEnvelope>,
    pub shutdown_tx: Option<oneshot::Sender<()>>,
    shared: Arc<Mutex<Shared>>,
    outcomes: Arc<Mutex<VecDeque<CibResult>>>,
}

impl TestHarness {
    /// Builds a `DaemonContext` wired to fake collaborators plus the harness
    /// used to drive and observe it. `node_id`/`preference` control election
    /// outcome the same way a real cluster's membership view would.
    pub fn build(config: Config, node_id: u32, preference: NodePreference) -> (DaemonContext, Self) {
        let shared = Arc::new(Mutex::new(Shared::default()));
        let outcomes = Arc::new(Mutex::new(VecDeque::new()));

        let (peer_tx, peer_rx) = mpsc::channel(64);
        let (cib_tx, cib_rx) = mpsc::channel(64);
        let (client_tx, client_rx) = mpsc::channel(64);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let cluster = Box::new(FakeClusterTransport { shared: shared.clone() });
        let cib = Box::new(FakeCibClient {
            shared: shared.clone(),
            next_txn: AtomicU64::new(0),
            next_correlation: AtomicU64::new(0),
            pending_ops: HashMap::new(),
            cib_events_tx: cib_tx.clone(),
            outcomes: outcomes.clone(),
        });
        let ipc = Box::new(FakeIpcTransport { shared: shared.clone() });

        let ctx = DaemonContext::new(
            config, node_id, preference, cluster, cib, ipc, peer_rx, cib_rx, client_rx, shutdown_rx,
        );

        let harness = Self { peer_tx, cib_tx, client_tx, shutdown_tx: Some(shutdown_tx), shared, outcomes };
        (ctx, harness)
    }

    /// Queues the next N CIB completion outcomes, consumed in order as
    /// `register_callback` is invoked (defaults to `Success` once the queue
    /// runs dry).
    pub fn queue_cib_outcome(&self, result: CibResult) {
        self.outcomes.lock().unwrap().push_back(result);
    }

    pub fn committed_transactions(&self) -> Vec<(CorrelationId, Vec<CibOp>)> {
        self.shared.lock().unwrap().committed.clone()
    }

    pub fn replies_for(&self, client: ClientId) -> Vec<Recorded> {
        self.shared.lock().unwrap().ipc_replies.get(&client.0).cloned().unwrap_or_default()
    }

    pub fn cluster_sent_count(&self) -> usize {
        self.shared.lock().unwrap().cluster_sent.len()
    }

    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }

    /// Polls `predicate` until it's true or `timeout` elapses, sleeping
    /// briefly between attempts. Used in place of a fixed `sleep` so tests
    /// don't race the daemon's own async handlers.
    pub async fn wait_until(&self, timeout: Duration, mut predicate: impl FnMut(&Self) -> bool) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if predicate(self) {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

impl Clone for Recorded {
    fn clone(&self) -> Self {
        match self {
            Recorded::Ack { request_id, protocol_version, status } => {
                Recorded::Ack { request_id: *request_id, protocol_version: *protocol_version, status: *status }
            }
            Recorded::Response { request_id, payload } => {
                Recorded::Response { request_id: *request_id, payload: payload.clone() }
            }
        }
    }
}

pub fn test_config(node_name: &str, node_id: u32) -> Config {
    let mut config = Config::default();
    config.node_name = node_name.to_string();
    config.node_id = node_id;
    config.timing.default_dampening = Duration::from_millis(10);
    config.timing.election_timeout = Duration::from_millis(200);
    config.timing.sync_timeout = Duration::from_millis(200);
    config.timing.cib_write_timeout = Duration::from_secs(5);
    config
}

pub fn no_peers_preference(node_id: u32) -> NodePreference {
    NodePreference { uptime: Duration::from_secs(0), join_instant: 0, node_id }
}
