// src/core/writer/mod.rs

//! The writer pipeline (spec.md §4.D) — the most intricate subsystem: per
//! attribute write decisions, transaction assembly against the CIB client,
//! completion handling with retry/backoff, and `write_all` for forced
//! whole-store flushes. Grounded in the teacher's `SpldbSaverTask`
//! (`core/persistence/spldb_saver.rs`) for the single-in-flight-write gating
//! and retry shape, generalized from "one save task for the whole
//! keyspace" to "one write decision per attribute".

use crate::core::interfaces::{CibOp, CibResult};
use crate::core::store::{Attribute, AttributeFlags, AttributeId, AttributeStore};
use std::collections::HashMap;
use std::time::Duration;

/// Resolves a node name to the CIB node-element uuid/id the writer needs to
/// address an nv-pair, and the node's numeric cluster id (used to derive the
/// default `status-<id>` set id). Implemented by whatever holds the current
/// membership view (the peer layer); kept abstract here so the writer never
/// depends on peer-layer internals directly.
pub trait NodeResolver {
    fn resolve(&self, node_name: &str) -> Option<(String, u32)>;
}

/// The outcome of asking the pipeline to write one attribute.
#[derive(Debug)]
pub enum WriteDecision {
    /// Nothing to do: not changed, private, stand-alone, or a write is
    /// already in flight.
    Skip,
    /// This node isn't the writer; the caller should make sure an election
    /// is running instead of attempting the write.
    DeferToElection,
    /// A transaction is ready to commit.
    Transaction(Vec<CibOp>),
}

/// What happened to a write once its completion callback fired.
#[derive(Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Write landed; no further action needed for the values it covered.
    Settled,
    /// Write landed, but newer changes accumulated while it was in flight;
    /// the attribute is still `CHANGED` and should be reconsidered on the
    /// next write-decision pass.
    SettledWithFollowup,
    /// Retry after `backoff`. Covers transient, timeout, and fatal/other CIB
    /// errors alike (spec.md §4.D.4) — there is no retry ceiling, so the
    /// attribute stays `CHANGED` until a write actually lands.
    Retry(Duration),
}

/// Bits controlling a `write_all` sweep (spec.md §4.D.6).
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteAllPolicy {
    /// Include every attribute, not just ones already marked `CHANGED`
    /// (used after an election win or a full CIB replacement, where the
    /// local view must be reasserted even if nothing "changed" locally).
    pub all: bool,
    /// Skip attributes currently pending a write if the daemon is mid
    /// shutdown, rather than waiting on them.
    pub skip_shutdown: bool,
    /// Ignore dampening: write immediately regardless of each attribute's
    /// configured delay.
    pub no_delay: bool,
}

const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(120);
/// §6.4: the temporary dampening timer used to retry a failed write when the
/// attribute itself has no configured dampening interval.
const TEMPORARY_RETRY_DELAY: Duration = Duration::from_millis(2000);

/// Owns retry bookkeeping across attempts; stateless with respect to the
/// store and CIB client themselves, which callers pass in explicitly (spec
/// §9's "fold globals into one context" design note — this pipeline holds
/// no global state of its own beyond per-attribute retry counters).
#[derive(Debug, Default)]
pub struct WriterPipeline {
    write_timeout: Duration,
    retry_counts: HashMap<AttributeId, u32>,
}

impl WriterPipeline {
    pub fn new(write_timeout: Duration) -> Self {
        Self {
            write_timeout: if write_timeout.is_zero() { DEFAULT_WRITE_TIMEOUT } else { write_timeout },
            retry_counts: HashMap::new(),
        }
    }

    pub fn write_timeout(&self) -> Duration {
        self.write_timeout
    }

    /// §4.D.1: whether `attr` should be written right now, ignoring
    /// dampening if `no_delay` (used by `write_all`).
    fn ready(&self, attr: &Attribute, no_delay: bool, dampening_elapsed: bool) -> bool {
        if attr.pending_write_id != 0 {
            return false;
        }
        if attr.is_private() || attr.is_stand_alone() {
            return false;
        }
        attr.is_changed() && (no_delay || attr.flags.contains(AttributeFlags::FORCE_WRITE) || dampening_elapsed)
    }

    /// §4.D.1/§4.D.5: the single-attribute write decision. `stand_alone` is
    /// the daemon-wide `--stand-alone` flag (spec.md §4.D.1's "no CIB path"
    /// precondition, checked ahead of everything else, same as a private
    /// attribute); `is_writer` gates whether this node may write at all once
    /// past that check — a non-writer with a write-eligible attribute must
    /// trigger an election instead.
    pub fn decide(
        &self,
        attr: &mut Attribute,
        stand_alone: bool,
        is_writer: bool,
        no_delay: bool,
        dampening_elapsed: bool,
        resolver: &dyn NodeResolver,
        local_node_id: u32,
    ) -> WriteDecision {
        if stand_alone {
            return WriteDecision::Skip;
        }
        if !self.ready(attr, no_delay, dampening_elapsed) {
            return WriteDecision::Skip;
        }
        if !is_writer {
            return WriteDecision::DeferToElection;
        }
        let (ops, unknown_peer_uuids) = assemble_transaction(attr, resolver, local_node_id);
        attr.flags.set(AttributeFlags::UNKNOWN_PEER_UUIDS, unknown_peer_uuids);
        if ops.is_empty() {
            WriteDecision::Skip
        } else {
            WriteDecision::Transaction(ops)
        }
    }

    /// §4.D.4: classifies a completion callback result and advances retry
    /// bookkeeping. `still_matches_requested` tells whether every value
    /// written is still equal to its `requested` snapshot (i.e. nothing
    /// newer arrived while the write was in flight). `dampening` is the
    /// attribute's own configured dampening interval, used as the retry
    /// delay when non-zero; fatal/other CIB errors are policy-equivalent to
    /// transient ones here and differ only in log severity (spec.md §4.D.4,
    /// §7).
    pub fn on_complete(
        &mut self,
        attribute_id: &AttributeId,
        result: CibResult,
        still_matches_requested: bool,
        dampening: Duration,
    ) -> WriteOutcome {
        match result {
            CibResult::Success => {
                self.retry_counts.remove(attribute_id);
                if still_matches_requested {
                    WriteOutcome::Settled
                } else {
                    WriteOutcome::SettledWithFollowup
                }
            }
            CibResult::Transient(reason) => {
                let attempt = self.bump_retry(attribute_id);
                tracing::warn!(attribute = %attribute_id, attempt, %reason, "CIB write failed, retrying");
                WriteOutcome::Retry(retry_delay(dampening))
            }
            CibResult::Timeout => {
                let attempt = self.bump_retry(attribute_id);
                tracing::warn!(attribute = %attribute_id, attempt, "CIB write timed out, retrying");
                WriteOutcome::Retry(retry_delay(dampening))
            }
            CibResult::Fatal(reason) => {
                let attempt = self.bump_retry(attribute_id);
                tracing::error!(attribute = %attribute_id, attempt, %reason, "CIB rejected write, retrying anyway");
                WriteOutcome::Retry(retry_delay(dampening))
            }
        }
    }

    pub fn retry_count(&self, attribute_id: &AttributeId) -> u32 {
        self.retry_counts.get(attribute_id).copied().unwrap_or(0)
    }

    fn bump_retry(&mut self, attribute_id: &AttributeId) -> u32 {
        let attempt = self.retry_counts.entry(attribute_id.clone()).or_insert(0);
        *attempt += 1;
        *attempt
    }
}

/// §4.D.4 retry delay: reuse the attribute's own dampening interval if one
/// is configured, otherwise the temporary 2000 ms timer (spec.md §6.4).
fn retry_delay(dampening: Duration) -> Duration {
    if dampening.is_zero() {
        TEMPORARY_RETRY_DELAY
    } else {
        dampening
    }
}

/// §4.D.2: builds the CIB operations for every value of `attr`. A value
/// whose node can't yet be resolved to a uuid is skipped for this round (the
/// attribute is marked `UNKNOWN_PEER_UUIDS` so a later `write_all` retries
/// it once membership catches up) rather than failing the whole
/// transaction.
fn assemble_transaction(
    attr: &Attribute,
    resolver: &dyn NodeResolver,
    local_node_id: u32,
) -> (Vec<CibOp>, bool) {
    let mut ops = Vec::with_capacity(attr.values.len());
    let mut unknown_peer_uuids = false;
    for (node_name, value) in &attr.values {
        let Some((node_uuid, node_id)) = resolver.resolve(node_name) else {
            unknown_peer_uuids = true;
            continue;
        };
        // Preserve current (rejecting) behavior for values targeting this
        // node that duplicate what this writer already holds committed,
        // rather than re-deriving the local value from a fresh resync.
        if node_id == local_node_id && value.current == value.requested && value.requested.is_some() {
            continue;
        }
        let set_id = attr.effective_set_id(node_id);
        let op = match &value.current {
            Some(v) => CibOp::Update {
                set_id,
                set_type: attr.set_type,
                node_uuid,
                attribute_id: attr.id.clone(),
                value: v.clone(),
            },
            None => CibOp::XpathDelete {
                set_id,
                set_type: attr.set_type,
                node_uuid,
                attribute_id: attr.id.clone(),
            },
        };
        ops.push(op);
    }
    (ops, unknown_peer_uuids)
}

/// Marks every value about to be included in `ops` as `requested` (spec.md
/// §4.D.2/§4.D.3), called right before committing the transaction.
pub fn mark_values_requested(attr: &mut Attribute) {
    for value in attr.values.values_mut() {
        value.mark_requested();
    }
}

/// Clears the in-flight marker on every value once a write settles (success
/// or give-up), restoring the invariant that `requested.is_none()` iff no
/// write is in flight for that value.
pub fn clear_requested(attr: &mut Attribute) {
    for value in attr.values.values_mut() {
        value.clear_requested();
    }
    attr.pending_write_id = 0;
}

/// §4.D.6: whether `attr` belongs in a `write_all` sweep under `policy`.
pub fn should_include_in_write_all(attr: &Attribute, policy: &WriteAllPolicy, shutting_down: bool) -> bool {
    if attr.is_private() || attr.is_stand_alone() {
        return false;
    }
    if policy.skip_shutdown && shutting_down && attr.pending_write_id != 0 {
        return false;
    }
    if policy.all {
        return true;
    }
    attr.is_changed() || attr.has_unknown_peer_uuids()
}
