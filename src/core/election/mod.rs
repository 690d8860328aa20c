// src/core/election/mod.rs

//! The writer election: a variant of the Garcia-Molina "invitation" bully
//! algorithm (spec.md §4.C), grounded in the teacher's quorum-counting vote
//! bookkeeping (`core/warden/worker.rs`'s `VOTE-REQUEST`/`VOTE-ACK` exchange)
//! and its `FailoverAuthRequest`/`FailoverAuthAck` cousin in
//! `core/cluster/failover.rs`, adapted from "count concessions toward a
//! numeric quorum" to the spec's "count concessions from every currently
//! active peer, tie-break on a preference tuple" shape.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// A node's standing in the tie-break comparison: uptime descending, then
/// cluster-join-instant ascending, then node id ascending (spec.md §4.C).
/// `join_instant` is a monotonic counter (e.g. cluster membership epoch),
/// not a wall clock, so it orders correctly across restarts without relying
/// on synchronized clocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodePreference {
    pub uptime: Duration,
    pub join_instant: u64,
    pub node_id: u32,
}

impl NodePreference {
    /// True iff `self` is strictly preferred over `other` under the tuple
    /// ordering (uptime desc, join_instant asc, node_id asc). Ties across
    /// all three fields never occur in practice (node ids are unique), but
    /// a full tie resolves to "not preferred" so ties can't make two peers
    /// each defer to the other.
    pub fn prefers_over(&self, other: &Self) -> bool {
        if self.uptime != other.uptime {
            return self.uptime > other.uptime;
        }
        if self.join_instant != other.join_instant {
            return self.join_instant < other.join_instant;
        }
        self.node_id < other.node_id
    }
}

/// The election's current state (spec.md §4.C).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectionState {
    Start,
    InProgress,
    Lost,
    Won,
    Error,
}

/// An election protocol message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ElectionMessage {
    /// Broadcast candidacy, identified by a locally unique round counter.
    Vote { round: u64, preference: NodePreference },
    /// Concession reply, targeted at the preferred candidate.
    NoVote { round: u64, target: String },
}

/// What the caller must do after feeding an inbound message to the state
/// machine.
#[derive(Debug, Clone)]
pub enum ElectionAction {
    /// Broadcast this vote and move to `InProgress`.
    BroadcastVote(ElectionMessage),
    /// Send this no-vote to the preferred candidate and move to `Lost`.
    SendNoVote(ElectionMessage),
    /// Nothing to do (e.g. a no-vote from a round we're no longer running).
    None,
    /// Quorum of concessions reached: this node just won.
    Won,
}

/// The per-node election state machine. One instance lives for the whole
/// daemon lifetime; `start_round`/`on_vote`/`on_no_vote`/`on_timeout`/
/// `cancel` are its only mutators.
#[derive(Debug)]
pub struct Election {
    my_name: String,
    my_preference: NodePreference,
    state: ElectionState,
    round: u64,
    active_peers: HashSet<String>,
    conceded_by: HashSet<String>,
}

impl Election {
    pub fn new(my_name: impl Into<String>, my_preference: NodePreference) -> Self {
        Self {
            my_name: my_name.into(),
            my_preference,
            state: ElectionState::Start,
            round: 0,
            active_peers: HashSet::new(),
            conceded_by: HashSet::new(),
        }
    }

    pub fn state(&self) -> ElectionState {
        self.state
    }

    pub fn is_writer(&self) -> bool {
        self.state == ElectionState::Won
    }

    pub fn in_progress(&self) -> bool {
        self.state == ElectionState::InProgress
    }

    pub fn current_round(&self) -> u64 {
        self.round
    }

    /// Starts a fresh round: broadcasts a vote for this node's own
    /// candidacy against the currently known active peer set.
    pub fn start_round(&mut self, active_peers: impl IntoIterator<Item = String>) -> ElectionMessage {
        self.round += 1;
        self.active_peers = active_peers.into_iter().collect();
        self.active_peers.remove(&self.my_name);
        self.conceded_by.clear();
        self.state = ElectionState::InProgress;
        if self.active_peers.is_empty() {
            // No other peers to concede: win immediately.
            self.state = ElectionState::Won;
        }
        ElectionMessage::Vote {
            round: self.round,
            preference: self.my_preference,
        }
    }

    /// Feeds an inbound `Vote` from `sender` into the state machine
    /// (spec.md §4.C transitions).
    pub fn on_vote(
        &mut self,
        sender: &str,
        sender_round: u64,
        sender_preference: NodePreference,
        active_peers: impl IntoIterator<Item = String>,
    ) -> ElectionAction {
        if self.my_preference.prefers_over(&sender_preference) {
            let msg = self.start_round(active_peers);
            return ElectionAction::BroadcastVote(msg);
        }
        self.state = ElectionState::Lost;
        ElectionAction::SendNoVote(ElectionMessage::NoVote {
            round: sender_round,
            target: sender.to_string(),
        })
    }

    /// Feeds an inbound `NoVote` concession into the state machine. Only
    /// counts toward quorum if we're in the round it answers.
    pub fn on_no_vote(&mut self, from: &str, round: u64) -> ElectionAction {
        if self.state != ElectionState::InProgress || round != self.round {
            return ElectionAction::None;
        }
        self.conceded_by.insert(from.to_string());
        if self.active_peers.is_subset(&self.conceded_by) {
            self.state = ElectionState::Won;
            return ElectionAction::Won;
        }
        ElectionAction::None
    }

    /// A round's configured timeout expired. A round concludes with
    /// whatever concessions arrived (spec.md §4.C); if that wasn't enough
    /// for quorum, the round is abandoned back to `Start` so a future
    /// write-or-elect call can try again.
    pub fn on_timeout(&mut self) {
        if self.state == ElectionState::InProgress {
            self.state = ElectionState::Start;
        }
    }

    /// Shutdown or peer-layer disconnect: reset to `Start`, stopping any
    /// timers the caller owns for this round.
    pub fn cancel(&mut self) {
        self.state = ElectionState::Start;
        self.active_peers.clear();
        self.conceded_by.clear();
    }

    pub fn mark_error(&mut self, _reason: impl Into<String>) {
        self.state = ElectionState::Error;
    }

    /// spec.md §4.B Sync: a sync response identifying its sender as the
    /// current writer demotes any local belief of having won. Only has an
    /// effect while this node believes itself `Won`; anything else is left
    /// alone (an election already in progress, lost, or not yet started
    /// isn't contradicted by seeing another writer).
    pub fn demote_if_won(&mut self) -> bool {
        if self.state == ElectionState::Won {
            self.state = ElectionState::Start;
            self.active_peers.clear();
            self.conceded_by.clear();
            true
        } else {
            false
        }
    }
}
