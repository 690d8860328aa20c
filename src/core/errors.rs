// src/core/errors.rs

//! Defines the primary error type for the entire daemon.

use std::num::ParseIntError;
use std::sync::Arc;
use thiserror::Error;

/// The main error enum, representing every failure kind named in the error
/// handling design: transient CIB failures, fatal disconnects, peer gaps,
/// bad input, protocol mismatches, and timeouts.
///
/// Using `thiserror` gives us clean `Display` impls and `From` conversions at
/// the boundary, the same way the upstream daemon normalizes negative-errno
/// and library-specific codes into one tagged type before anything inward
/// sees it.
#[derive(Error, Debug, Clone)]
pub enum AttrdError {
    #[error("IO error: {0}")]
    Io(Arc<std::io::Error>),

    /// A CIB write failed for a recoverable reason: diff-apply conflict,
    /// an election in progress, or a sync already underway. Callers retry
    /// with backoff; the attribute stays marked changed.
    #[error("transient CIB error: {0}")]
    TransientCib(String),

    /// The CIB write callback never arrived before the write's deadline.
    /// Treated identically to `TransientCib` for retry purposes.
    #[error("CIB write timed out")]
    Timeout,

    /// The CIB connection was lost while the daemon was not shutting down.
    #[error("fatal CIB disconnect: {0}")]
    FatalCibDisconnect(String),

    /// Every inbound event channel (peers, CIB, IPC) went silent at once
    /// while the daemon was not shutting down — the cluster messaging layer
    /// is gone and there is nothing left to multiplex.
    #[error("fatal cluster layer disconnect: {0}")]
    FatalClusterDisconnect(String),

    /// A value names a peer (by id, name, or uuid) this node cannot
    /// currently resolve. The caller skips that value for this write and
    /// sets the attribute's `unknown_peer_uuids` flag.
    #[error("unknown peer: {0}")]
    PeerUnknown(String),

    /// Bad regex, an unparseable `value++`/`value+=N` expansion, or an
    /// unknown attribute set type. The request is failed outright; the
    /// store is left untouched.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A request needs a peer protocol feature newer than the cluster-wide
    /// minimum version currently in effect.
    #[error("protocol mismatch: requires version {required}, cluster minimum is {minimum}")]
    ProtocolMismatch { required: u32, minimum: u32 },

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for AttrdError {
    fn from(e: std::io::Error) -> Self {
        AttrdError::Io(Arc::new(e))
    }
}

impl From<regex::Error> for AttrdError {
    fn from(e: regex::Error) -> Self {
        AttrdError::InvalidInput(format!("bad filter regex: {e}"))
    }
}

impl From<ParseIntError> for AttrdError {
    fn from(e: ParseIntError) -> Self {
        AttrdError::InvalidInput(format!("not an integer: {e}"))
    }
}

impl From<serde_json::Error> for AttrdError {
    fn from(e: serde_json::Error) -> Self {
        AttrdError::Internal(format!("(de)serialization error: {e}"))
    }
}

/// Whether an error should be retried with backoff (§7: `TransientCibError`
/// and `Timeout`) or surfaced immediately to the caller.
impl AttrdError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, AttrdError::TransientCib(_) | AttrdError::Timeout)
    }
}
