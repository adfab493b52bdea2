use std::collections::HashSet;

use bandstand_core::ConnectionId;
use serde::Deserialize;

use crate::VoteCounts;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteKind {
    Approve,
    Disapprove,
}

/// The votes cast on the currently playing track. Cleared whenever the
/// track changes.
#[derive(Default)]
pub struct VoteSet {
    approve: HashSet<ConnectionId>,
    disapprove: HashSet<ConnectionId>,
    track_id: Option<String>,
}

impl VoteSet {
    /// Re-scopes the set to a new track, discarding all votes.
    pub fn set_track(&mut self, track_id: Option<String>) {
        self.approve.clear();
        self.disapprove.clear();
        self.track_id = track_id;
    }

    /// Records a vote, replacing any prior vote by the same connection so a
    /// voter is never counted in both sets.
    pub fn apply(&mut self, voter: ConnectionId, kind: VoteKind) {
        self.approve.remove(&voter);
        self.disapprove.remove(&voter);

        match kind {
            VoteKind::Approve => self.approve.insert(voter),
            VoteKind::Disapprove => self.disapprove.insert(voter),
        };
    }

    /// Removes all votes by a departing connection.
    pub fn remove(&mut self, voter: ConnectionId) {
        self.approve.remove(&voter);
        self.disapprove.remove(&voter);
    }

    /// Clears the set and returns how many approvals it held, which is the
    /// reputation payout for the ending track.
    pub fn reset(&mut self) -> usize {
        let approvals = self.approve.len();

        self.approve.clear();
        self.disapprove.clear();
        self.track_id = None;

        approvals
    }

    pub fn counts(&self) -> VoteCounts {
        VoteCounts {
            approve: self.approve.len(),
            disapprove: self.disapprove.len(),
        }
    }
}
