// src/core/store/mod.rs

//! The in-memory attribute store: the arena of `Attribute`s and their
//! per-node `Value`s, plus the upsert/erase/filter operations that keep the
//! "changed" and "unknown peer uuids" bookkeeping correct.

mod attribute;
mod expand;
mod value;

pub use attribute::{Attribute, AttributeFlags, SetType};
pub use value::Value;

use crate::core::errors::AttrdError;
use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A stable attribute identifier. Cheap to clone since timers and CIB
/// callback user-data carry one around independently of the `Attribute`
/// itself (see SPEC_FULL.md §3 "pointer graphs").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttributeId(Arc<str>);

impl AttributeId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AttributeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AttributeId {
    fn from(s: &str) -> Self {
        AttributeId(Arc::from(s))
    }
}

impl From<String> for AttributeId {
    fn from(s: String) -> Self {
        AttributeId(Arc::from(s.as_str()))
    }
}

/// Identifies the node a value belongs to, as supplied by the peer layer.
/// The store does not own peers (spec.md §3); this is just the subset of
/// identity a value needs to resolve one later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeIdentity {
    pub name: String,
    pub id: Option<u32>,
    pub is_remote: Option<bool>,
}

impl NodeIdentity {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: None,
            is_remote: None,
        }
    }
}

/// Options accompanying an `upsert` call.
#[derive(Debug, Clone, Default)]
pub struct UpsertOptions {
    /// Force a write even if dampening would otherwise delay it.
    pub force_write: bool,
    /// This update must not reach the CIB even if the attribute isn't
    /// otherwise marked private (used for daemon-internal bookkeeping
    /// attributes such as the startup protocol-version marker).
    pub stand_alone: bool,
    /// Mark the attribute private: its values never reach the CIB.
    pub private: bool,
    /// Explicit set id; when absent the effective set id defaults to
    /// `"status-" + node_id` the first time it's needed.
    pub set_id: Option<String>,
    pub set_type: Option<SetType>,
    pub dampening: Option<std::time::Duration>,
    pub user: Option<String>,
}

/// What changed as a result of an `upsert`, so callers (peer broadcast, the
/// writer pipeline's write decision) know whether to act.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub attribute_id: AttributeId,
    pub node_name: String,
    pub value_changed: bool,
    pub resolved_value: Option<String>,
}

/// The three clear-failure regex forms (spec.md §4.A): match everything for
/// an attribute, match a specific resource, or match a specific
/// resource+operation pair. `attrd` attribute names for fail-counts follow
/// the convention `fail-count-<resource>#<operation>_<interval>`.
#[derive(Debug, Clone)]
pub enum ClearFailureFilter<'a> {
    AnyResource,
    Resource(&'a str),
    ResourceOperation(&'a str, &'a str),
}

impl<'a> ClearFailureFilter<'a> {
    fn compile(&self) -> Result<Regex, AttrdError> {
        let pattern = match self {
            ClearFailureFilter::AnyResource => r"^fail-(count|last-failure)-.+".to_string(),
            ClearFailureFilter::Resource(r) => {
                format!(r"^fail-(count|last-failure)-{}(#.+)?$", regex::escape(r))
            }
            ClearFailureFilter::ResourceOperation(r, op) => format!(
                r"^fail-(count|last-failure)-{}#{}(_\d+)?$",
                regex::escape(r),
                regex::escape(op)
            ),
        };
        Regex::new(&pattern).map_err(AttrdError::from)
    }
}

/// The in-memory store owning every attribute known to this daemon.
#[derive(Debug, Default)]
pub struct AttributeStore {
    attributes: HashMap<AttributeId, Attribute>,
}

impl AttributeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, attribute_id: &AttributeId) -> Option<&Attribute> {
        self.attributes.get(attribute_id)
    }

    pub fn lookup_mut(&mut self, attribute_id: &AttributeId) -> Option<&mut Attribute> {
        self.attributes.get_mut(attribute_id)
    }

    pub fn for_each_attribute(&self, mut f: impl FnMut(&Attribute)) {
        for attr in self.attributes.values() {
            f(attr);
        }
    }

    pub fn for_each_attribute_mut(&mut self, mut f: impl FnMut(&mut Attribute)) {
        for attr in self.attributes.values_mut() {
            f(attr);
        }
    }

    pub fn for_each_value(&self, attribute_id: &AttributeId, mut f: impl FnMut(&str, &Value)) {
        if let Some(attr) = self.attributes.get(attribute_id) {
            for (node, value) in &attr.values {
                f(node, value);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &AttributeId> {
        self.attributes.keys()
    }

    /// Creates the attribute on first reference, applying `options` only if
    /// the attribute did not already exist (matching spec.md's "created on
    /// first update" lifecycle: later `upsert`s never resurrect dampening or
    /// privacy from stale options).
    fn get_or_create(&mut self, attribute_id: &AttributeId, options: &UpsertOptions) -> &mut Attribute {
        self.attributes
            .entry(attribute_id.clone())
            .or_insert_with(|| Attribute::new(attribute_id.clone(), options))
    }

    /// Applies one update to `(attribute_id, node)`. Handles the `value++` /
    /// `value+=N` expansion grammar, sets the "changed" flag on real change,
    /// and derives the effective set id the first time it's needed.
    ///
    /// `node.id` is folded into the value as "learned" — the peer's numeric
    /// id, once known, is never un-learned by a later upsert that omits it.
    pub fn upsert(
        &mut self,
        attribute_id: &AttributeId,
        node: &NodeIdentity,
        new_value: Option<&str>,
        options: &UpsertOptions,
    ) -> Result<UpsertOutcome, AttrdError> {
        let attr = self.get_or_create(attribute_id, options);
        if options.set_id.is_some() && attr.set_id.is_none() {
            attr.set_id = options.set_id.clone();
        }
        if let Some(user) = &options.user {
            attr.user.get_or_insert_with(|| user.clone());
        }

        let previous = attr
            .values
            .get(&node.name)
            .and_then(|v| v.current.clone());

        let resolved_value = match new_value {
            Some(raw) => Some(expand::resolve(raw, previous.as_deref())?),
            None => None,
        };

        let value_changed = {
            let entry = attr
                .values
                .entry(node.name.clone())
                .or_insert_with(|| Value::new(node.clone()));
            if let Some(id) = node.id {
                entry.node_id = Some(id);
            }
            if let Some(remote) = node.is_remote {
                entry.is_remote = Some(remote);
            }
            let changed = entry.current != resolved_value;
            entry.current = resolved_value.clone();
            changed
        };

        if value_changed {
            attr.flags.insert(AttributeFlags::CHANGED);
        }
        if options.force_write {
            attr.flags.insert(AttributeFlags::FORCE_WRITE);
        }

        Ok(UpsertOutcome {
            attribute_id: attribute_id.clone(),
            node_name: node.name.clone(),
            value_changed,
            resolved_value,
        })
    }

    /// Removes every value belonging to `node_name`, across all attributes.
    /// Attributes with no remaining values are left in place (they are only
    /// destroyed on daemon shutdown, per spec.md §3's lifecycle rule).
    pub fn erase_peer(&mut self, node_name: &str) {
        for attr in self.attributes.values_mut() {
            attr.values.remove(node_name);
        }
    }

    /// Marks every attribute matching `filter` as deleted (removes it from
    /// the store outright — clear-failure is a delete, not a value change).
    /// An unmatched filter is a no-op, not an error; an invalid filter is.
    pub fn delete_matching(&mut self, filter: ClearFailureFilter<'_>) -> Result<Vec<AttributeId>, AttrdError> {
        let re = filter.compile()?;
        let matched: Vec<AttributeId> = self
            .attributes
            .keys()
            .filter(|id| re.is_match(id.as_str()))
            .cloned()
            .collect();
        for id in &matched {
            self.attributes.remove(id);
        }
        Ok(matched)
    }

    /// Drops an attribute entirely. Only reachable through an explicit
    /// operator request; normal updates never call this.
    pub fn remove_attribute(&mut self, attribute_id: &AttributeId) -> Option<Attribute> {
        self.attributes.remove(attribute_id)
    }
}
