// src/core/store/attribute.rs

//! The `Attribute` entity (spec.md §3) and its small supporting enums.

use super::{AttributeId, UpsertOptions, Value};
use bitflags::bitflags;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Which CIB container an attribute's values are written under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SetType {
    #[default]
    Standard,
    Utilization,
}

bitflags! {
    /// Per-attribute boolean state, grouped into one bitflags value the way
    /// the teacher groups per-node boolean state into `NodeFlags`
    /// (`core/cluster/state.rs`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AttributeFlags: u8 {
        /// Values never reach the CIB.
        const PRIVATE            = 0b0000_0001;
        /// Next write ignores dampening.
        const FORCE_WRITE         = 0b0000_0010;
        /// At least one value changed since the last successful write.
        const CHANGED             = 0b0000_0100;
        /// At least one value's node has no known uuid yet; retried on the
        /// next `write_all`.
        const UNKNOWN_PEER_UUIDS  = 0b0000_1000;
        /// Updates are local-only: never broadcast, never written.
        const STAND_ALONE         = 0b0001_0000;
    }
}

/// An attribute and every node's value for it.
#[derive(Debug, Clone)]
pub struct Attribute {
    pub id: AttributeId,
    pub set_id: Option<String>,
    pub set_type: SetType,
    pub dampening: Duration,
    pub flags: AttributeFlags,
    /// 0 means "no write in flight" (spec.md §3 invariant).
    pub pending_write_id: u64,
    pub filter_source: Option<String>,
    pub user: Option<String>,
    pub values: HashMap<String, Value>,
}

impl Attribute {
    pub(super) fn new(id: AttributeId, options: &UpsertOptions) -> Self {
        let mut flags = AttributeFlags::empty();
        flags.set(AttributeFlags::PRIVATE, options.private);
        flags.set(AttributeFlags::STAND_ALONE, options.stand_alone);
        Self {
            id,
            set_id: options.set_id.clone(),
            set_type: options.set_type.unwrap_or_default(),
            dampening: options.dampening.unwrap_or_default(),
            flags,
            pending_write_id: 0,
            filter_source: None,
            user: options.user.clone(),
            values: HashMap::new(),
        }
    }

    /// The set id a write actually uses: the explicit one if set, otherwise
    /// the node-scoped default `"status-" + node_id` (spec.md §3).
    pub fn effective_set_id(&self, node_id: u32) -> String {
        self.set_id
            .clone()
            .unwrap_or_else(|| format!("status-{node_id}"))
    }

    pub fn is_private(&self) -> bool {
        self.flags.contains(AttributeFlags::PRIVATE)
    }

    pub fn is_stand_alone(&self) -> bool {
        self.flags.contains(AttributeFlags::STAND_ALONE)
    }

    pub fn is_changed(&self) -> bool {
        self.flags.contains(AttributeFlags::CHANGED)
    }

    pub fn has_unknown_peer_uuids(&self) -> bool {
        self.flags.contains(AttributeFlags::UNKNOWN_PEER_UUIDS)
    }

    /// Whether the attribute's own filter regex source (if any) matches
    /// `candidate`. Reserved for attribute-scoped display filtering; most
    /// attributes carry no filter and this is trivially `true`.
    pub fn matches_filter(&self, candidate: &str) -> Result<bool, regex::Error> {
        match &self.filter_source {
            None => Ok(true),
            Some(source) => Ok(Regex::new(source)?.is_match(candidate)),
        }
    }
}
