// src/core/lifecycle.rs

//! Startup and shutdown sequencing (spec.md §4.G). Grounded in the
//! teacher's `setup()` (`server/initialization.rs`), which sequences
//! persistence load, replication bring-up, and listener startup in a fixed
//! order before the server begins serving; here the corresponding sequence
//! is CIB connect, wipe this node's transient attributes, arm the config
//! read, join the election, then begin serving.

use crate::core::errors::AttrdError;
use crate::core::interfaces::CibClient;

/// Runs once at startup, before the main event loop begins (spec.md §4.G):
/// wipes any transient attributes this node left behind from a prior run
/// (they're meaningless after a restart — the in-memory store that produced
/// them is gone). The CIB connection itself is established by the caller
/// before constructing the context, so this only issues the wipe; in
/// `--stand-alone` mode there is no CIB connection to wipe against at all,
/// so this is skipped entirely (spec.md §6.2).
pub async fn startup(cib: &mut dyn CibClient, local_node_uuid: &str, stand_alone: bool) -> Result<(), AttrdError> {
    if stand_alone {
        return Ok(());
    }
    let wipe_path = format!(
        "//node_state[@uuid='{local_node_uuid}']/transient_attributes[@id='status-{local_node_uuid}']"
    );
    cib.remove_xpath(wipe_path).await?;
    tracing::info!(node = %local_node_uuid, "wiped transient attributes from a prior run");
    Ok(())
}

/// Tracks whether the daemon is mid-shutdown so every other component can
/// turn its request/event handlers into no-ops (spec.md §4.G) without the
/// context needing to thread a bare `bool` through every call site.
#[derive(Debug, Default)]
pub struct ShutdownState {
    shutting_down: bool,
}

impl ShutdownState {
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down
    }

    /// Begins shutdown: from this point on, callers should treat inbound
    /// client requests and peer messages as no-ops and stop accepting new
    /// work, per spec.md §4.G.
    pub fn begin(&mut self) {
        self.shutting_down = true;
    }
}

/// Runs once when the main loop exits (spec.md §4.G): disconnects from the
/// CIB. Signal handler teardown and listener shutdown are the IPC/cluster
/// transports' own responsibility to perform on `Drop`. A no-op in
/// `--stand-alone` mode, where no CIB connection was ever established.
pub async fn shutdown(cib: &mut dyn CibClient, stand_alone: bool) -> Result<(), AttrdError> {
    if stand_alone {
        return Ok(());
    }
    cib.disconnect().await
}
