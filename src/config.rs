// src/config.rs

//! Manages daemon configuration: loading, defaulting, and validation.

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;

/// Configuration for the Prometheus metrics exporter. Mirrors the shape of
/// a Redis-server-style metrics config block: an enabled flag plus a port,
/// defaulted so an operator who never mentions `[metrics]` still gets one.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: false, port: default_metrics_port() }
    }
}

fn default_metrics_port() -> u16 {
    8900
}

/// Dampening/timeout defaults applied to attributes that don't specify
/// their own, and to the writer pipeline's own retry/backoff and election
/// timers.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TimingConfig {
    /// Default per-attribute dampening delay before a changed value is
    /// eligible for write.
    #[serde(with = "humantime_serde", default = "default_dampening")]
    pub default_dampening: Duration,
    /// How long a single CIB write waits for its completion callback before
    /// being treated as timed out.
    #[serde(with = "humantime_serde", default = "default_cib_write_timeout")]
    pub cib_write_timeout: Duration,
    /// How long an election round waits for no-votes before being
    /// abandoned back to `Start`.
    #[serde(with = "humantime_serde", default = "default_election_timeout")]
    pub election_timeout: Duration,
    /// How long an IPC client's sync-point wait ("local"/"all") is honored
    /// before the daemon reports timeout.
    #[serde(with = "humantime_serde", default = "default_sync_timeout")]
    pub sync_timeout: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            default_dampening: default_dampening(),
            cib_write_timeout: default_cib_write_timeout(),
            election_timeout: default_election_timeout(),
            sync_timeout: default_sync_timeout(),
        }
    }
}

fn default_dampening() -> Duration {
    Duration::from_millis(2000)
}
fn default_cib_write_timeout() -> Duration {
    Duration::from_secs(120)
}
fn default_election_timeout() -> Duration {
    Duration::from_secs(2)
}
fn default_sync_timeout() -> Duration {
    Duration::from_secs(60)
}

/// One other cluster member reachable by the UDP cluster transport,
/// resolved statically from config rather than discovered (spec.md §6.3
/// treats cluster membership as supplied by an external layer; a static
/// peer list is the simplest faithful stand-in for it).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PeerEndpoint {
    pub name: String,
    pub addr: String,
    pub id: u32,
    pub uuid: String,
}

/// Where the three external collaborators are reached.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct EndpointsConfig {
    /// Path to the Unix domain socket the IPC server listens on.
    #[serde(default = "default_ipc_socket")]
    pub ipc_socket: String,
    /// Local UDP address the cluster transport binds to.
    #[serde(default = "default_cluster_bind")]
    pub cluster_bind: String,
    /// Statically configured peer addresses (spec.md §6.3 `ClusterMessaging`
    /// is an external collaborator; this is how its membership view is
    /// supplied in the absence of a real discovery protocol).
    #[serde(default)]
    pub peers: Vec<PeerEndpoint>,
    /// Address of the CIB RPC endpoint this daemon submits writes to.
    #[serde(default = "default_cib_addr")]
    pub cib_addr: String,
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            ipc_socket: default_ipc_socket(),
            cluster_bind: default_cluster_bind(),
            peers: Vec::new(),
            cib_addr: default_cib_addr(),
        }
    }
}

fn default_ipc_socket() -> String {
    "/var/run/clattrd.sock".to_string()
}
fn default_cluster_bind() -> String {
    "0.0.0.0:5405".to_string()
}
fn default_cib_addr() -> String {
    "127.0.0.1:5560".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_protocol_version() -> u32 {
    4
}

fn default_node_id() -> u32 {
    1
}

/// The daemon's resolved configuration.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    /// This node's name, as known to the rest of the cluster.
    pub node_name: String,
    /// This node's numeric cluster id, used to derive the default
    /// `status-<id>` set id (spec.md §3) and to detect self-targeted
    /// writes in the writer pipeline.
    #[serde(default = "default_node_id")]
    pub node_id: u32,
    /// This node's own stable CIB uuid, the same kind of identifier the
    /// cluster layer supplies for every other peer (`PeerEndpoint::uuid`).
    /// Needed so the writer pipeline can resolve this node's own values the
    /// same way it resolves a peer's (spec.md §4.D.2 treats "uuid unknown"
    /// uniformly regardless of whose value it is). Defaults to `node_name`
    /// when unset, which is sufficient for a stand-alone or single-node
    /// deployment where no separate uuid authority exists yet.
    #[serde(default)]
    pub node_uuid: Option<String>,
    /// A monotonic cluster-membership epoch used only to break election
    /// ties (spec.md §4.C); not a wall clock, so it orders correctly across
    /// restarts with unsynchronized clocks.
    #[serde(default)]
    pub cluster_join_instant: u64,
    /// Run without joining a cluster: never broadcasts, never elects, never
    /// writes to a CIB (spec.md §6.2 `--stand-alone`).
    #[serde(default)]
    pub stand_alone: bool,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_protocol_version")]
    pub protocol_version: u32,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub endpoints: EndpointsConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_name: whoami_node_name(),
            node_id: default_node_id(),
            node_uuid: None,
            cluster_join_instant: 0,
            stand_alone: false,
            log_level: default_log_level(),
            protocol_version: default_protocol_version(),
            timing: TimingConfig::default(),
            endpoints: EndpointsConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

fn whoami_node_name() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string())
}

impl Config {
    /// This node's own uuid, falling back to `node_name` when none was
    /// configured (see `node_uuid`'s doc comment).
    pub fn resolved_node_uuid(&self) -> String {
        self.node_uuid.clone().unwrap_or_else(|| self.node_name.clone())
    }

    /// Reads and parses a TOML config file, falling back to defaults for
    /// anything unspecified.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{path}'"))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse TOML from '{path}'"))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the resolved configuration for logical consistency.
    fn validate(&self) -> Result<()> {
        if self.node_name.trim().is_empty() {
            return Err(anyhow!("node_name cannot be empty"));
        }
        if self.protocol_version == 0 {
            return Err(anyhow!("protocol_version cannot be 0"));
        }
        if self.metrics.enabled && self.metrics.port == 0 {
            return Err(anyhow!("metrics.port cannot be 0 when metrics are enabled"));
        }
        if self.endpoints.ipc_socket.trim().is_empty() {
            return Err(anyhow!("endpoints.ipc_socket cannot be empty"));
        }
        Ok(())
    }
}
