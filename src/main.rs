// src/main.rs

//! The entry point for the cluster attribute daemon.

use anyhow::Result;
use clattrd::config::Config;
use clattrd::core::context::DaemonContext;
use clattrd::core::election::NodePreference;
use clattrd::core::errors::AttrdError;
use clattrd::core::interfaces::CibClient;
use clattrd::transport::cib::TcpCibClient;
use clattrd::transport::cluster::UdpClusterTransport;
use clattrd::transport::ipc::UnixIpcTransport;
use std::env;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{filter::EnvFilter, prelude::*, reload};

const EXIT_OK: i32 = 0;
const EXIT_LOST_CLUSTER_LAYER: i32 = 1;
const EXIT_LOST_CIB: i32 = 2;
const EXIT_CONFIG_ERROR: i32 = 3;

#[tokio::main]
async fn main() {
    std::process::exit(run_app().await);
}

async fn run_app() -> i32 {
    const VERSION: &str = env!("CARGO_PKG_VERSION");
    let args: Vec<String> = env::args().collect();

    if args.iter().any(|a| a == "--version" || a == "-v") {
        println!("clattrd version {VERSION}");
        return EXIT_OK;
    }
    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return EXIT_OK;
    }

    let config_path = args
        .iter()
        .position(|arg| arg == "--config" || arg == "-c")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
        .unwrap_or("/etc/clattrd/clattrd.toml");

    let mut config = match Config::from_file(config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration from \"{config_path}\": {e}");
            return EXIT_CONFIG_ERROR;
        }
    };

    if args.iter().any(|a| a == "--stand-alone" || a == "-s") {
        config.stand_alone = true;
    }
    let verbose = args.iter().any(|a| a == "--verbose" || a == "-V");

    init_tracing(&config, verbose);

    info!(node = %config.node_name, stand_alone = config.stand_alone, "clattrd starting");

    if config.metrics.enabled {
        match format!("0.0.0.0:{}", config.metrics.port).parse() {
            Ok(addr) => clattrd::transport::metrics_http::spawn(addr),
            Err(e) => tracing::warn!(error = %e, "invalid metrics bind address, metrics server disabled"),
        }
    }

    match run_daemon(config).await {
        Ok(code) => code,
        Err(e) => {
            error!("clattrd: fatal startup error: {e:#}");
            EXIT_CONFIG_ERROR
        }
    }
}

fn print_usage() {
    println!(
        "clattrd [OPTIONS]\n\n\
         Cluster attribute daemon: peer-replicated transient attributes with\n\
         elected-writer CIB persistence.\n\n\
         OPTIONS:\n    \
         -c, --config <PATH>   Path to the TOML config file (default: /etc/clattrd/clattrd.toml)\n    \
         -s, --stand-alone     Run without joining a cluster (no CIB writes, no peer gossip)\n    \
         -V, --verbose         Raise the log level to debug\n    \
         -v, --version         Print the version and exit\n    \
         -h, --help            Print this help and exit"
    );
}

/// Sets up a reloadable env-filter layer, the same shape as the teacher's
/// `reload::Layer`, so a future admin command could lower/raise verbosity
/// without a restart even though nothing wires that up yet.
fn init_tracing(config: &Config, verbose: bool) {
    let initial_log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if verbose { "debug".to_string() } else { config.log_level.clone() }
    });

    let (filter, _reload_handle) = reload::Layer::new(EnvFilter::new(initial_log_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().compact().with_ansi(true))
        .init();
}

/// Builds the three external collaborators, wires a ctrl-c handler into the
/// daemon's shutdown signal, and runs the context to completion. Returns the
/// process exit code, per spec.md §6.2.
async fn run_daemon(config: Config) -> Result<i32> {
    let bind_addr = config.endpoints.cluster_bind.clone();
    let peers = config.endpoints.peers.clone();
    let (cluster, peer_events) = match UdpClusterTransport::bind(&bind_addr, &peers).await {
        Ok(v) => v,
        Err(e) => {
            error!(error = %e, addr = %bind_addr, "failed to bind cluster transport");
            return Ok(EXIT_LOST_CLUSTER_LAYER);
        }
    };

    let (mut cib, cib_events) = TcpCibClient::new(config.endpoints.cib_addr.clone());
    if !config.stand_alone {
        if let Err(e) = cib.connect().await {
            error!(error = %e, addr = %config.endpoints.cib_addr, "failed to connect to CIB");
            return Ok(EXIT_LOST_CIB);
        }
    }

    let ipc_socket = config.endpoints.ipc_socket.clone();
    let (ipc, client_requests) = UnixIpcTransport::bind(&ipc_socket)
        .await
        .map_err(|e| anyhow::anyhow!("failed to bind IPC socket at {ipc_socket}: {e}"))?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received shutdown signal");
            let _ = shutdown_tx.send(());
        }
    });

    let node_id = config.node_id;
    let preference = NodePreference {
        // No wall-clock uptime tracking exists yet (nothing restarts this
        // process mid-run to compare against); every node starts a round
        // with zero uptime, so ties fall through to join_instant/node_id.
        uptime: Duration::from_secs(0),
        join_instant: config.cluster_join_instant,
        node_id,
    };

    let mut ctx = DaemonContext::new(
        config,
        node_id,
        preference,
        Box::new(cluster),
        Box::new(cib),
        Box::new(ipc),
        peer_events,
        cib_events,
        client_requests,
        shutdown_rx,
    );

    let code = match ctx.run().await {
        Ok(()) => EXIT_OK,
        Err(AttrdError::FatalCibDisconnect(msg)) => {
            error!(%msg, "fatal CIB disconnect");
            EXIT_LOST_CIB
        }
        Err(AttrdError::FatalClusterDisconnect(msg)) => {
            error!(%msg, "fatal cluster layer disconnect");
            EXIT_LOST_CLUSTER_LAYER
        }
        Err(e) => {
            error!(error = %e, "daemon exited with an error");
            EXIT_CONFIG_ERROR
        }
    };
    Ok(code)
}
