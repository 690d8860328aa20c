// src/transport/mod.rs

//! Concrete implementations of the three external collaborator interfaces
//! (spec.md §6.3): a UDP cluster transport, a length-delimited-framed CIB
//! RPC client, and a Unix-domain-socket IPC server. The core (`src/core/`)
//! never references these directly — it only sees the `ClusterTransport`/
//! `CibClient`/`IpcTransport` traits from `core::interfaces` — so any of
//! these can be swapped for a real cluster-messaging/CIB/IPC stack without
//! touching the daemon's logic.

pub mod cib;
pub mod cluster;
pub mod ipc;
pub mod metrics_http;
