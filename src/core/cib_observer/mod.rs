// src/core/cib_observer/mod.rs

//! Reacts to CIB patchset notifications and disconnects (spec.md §4.E).
//! Grounded in the teacher's `GossipMessage::ConfigUpdate` handling in
//! `core/cluster/gossip.rs` for "a notification coalesces into one pending
//! action flag, consumed on the next loop tick" and in
//! `core/warden/worker.rs`'s disconnect-is-fatal-unless-shutting-down
//! handling for `handle_disconnect`.

use crate::core::errors::AttrdError;
use crate::core::interfaces::{ChangeOrigin, CibPatchset, CibSection};
use crate::core::writer::WriteAllPolicy;

/// What the context must do in response to one patchset notification.
#[derive(Debug, Clone, Default)]
pub struct PatchsetOutcome {
    /// An alerts section changed: a config reread is due. Coalesced into a
    /// flag rather than a dedicated debounce timer, since the context
    /// already visits this once per `select!` iteration.
    pub trigger_config_read: bool,
    /// A node/status section changed in a way that requires reasserting the
    /// full local view (an external client edited it directly, or the
    /// whole CIB was replaced and touched node/status).
    pub write_all: Option<WriteAllPolicy>,
}

/// Tracks the coalesced config-read flag across patchsets until the context
/// consumes it.
#[derive(Debug, Default)]
pub struct CibObserver {
    config_read_pending: bool,
}

impl CibObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// §4.E: classifies one patchset notification. `is_writer` gates
    /// whether node/status edits provoke a `write_all` — only the writer
    /// needs to reassert the CIB; a non-writer has nothing to write.
    pub fn handle_patchset(&mut self, patchset: &CibPatchset, is_writer: bool) -> PatchsetOutcome {
        let mut outcome = PatchsetOutcome::default();

        if patchset.sections.contains(&CibSection::Alerts) {
            self.config_read_pending = true;
        }

        if is_writer && patchset.sections.contains(&CibSection::NodeOrStatus) {
            let unsafe_external_edit = !patchset.is_full_replacement
                && patchset.origin != ChangeOrigin::ThisDaemon
                && patchset.origin != ChangeOrigin::Controller;
            let replacement_touching_node_status = patchset.is_full_replacement;
            if unsafe_external_edit || replacement_touching_node_status {
                outcome.write_all = Some(WriteAllPolicy {
                    all: true,
                    skip_shutdown: false,
                    no_delay: true,
                });
            }
        }

        outcome.trigger_config_read = self.config_read_pending;
        outcome
    }

    /// Consumes the coalesced config-read flag; returns whether one was
    /// pending.
    pub fn take_pending_config_read(&mut self) -> bool {
        std::mem::take(&mut self.config_read_pending)
    }

    /// §4.E / §9 Open Question: a CIB disconnect while not shutting down is
    /// fatal and ends the process; while shutting down it's expected and
    /// merely logged. Reconnection is a legitimate alternative design but is
    /// not implemented here, preserving the daemon's current behavior.
    pub fn handle_disconnect(&self, shutting_down: bool) -> Result<(), AttrdError> {
        if shutting_down {
            tracing::info!("CIB connection closed during shutdown");
            Ok(())
        } else {
            Err(AttrdError::FatalCibDisconnect(
                "lost connection to the CIB outside of shutdown".to_string(),
            ))
        }
    }
}
