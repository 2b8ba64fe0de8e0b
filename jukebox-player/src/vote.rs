//! Vote-to-skip tally
//!
//! Counts distinct voters against the currently playing item. The threshold
//! scales with the audience: `listeners / 4 + 1`. Reaching it resets the
//! tally so the next item starts from zero.
//!
//! Every vote names the item it targets; a vote for anything other than the
//! scoped item is refused, so a vote racing an item change never lands on
//! the next item.

use crate::error::VoteError;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

/// Result of a single vote
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum VoteOutcome {
    /// Counted; threshold not reached yet
    Recorded { votes: usize, threshold: usize },
    /// Voter already counted for this item
    AlreadyVoted { votes: usize, threshold: usize },
    /// Threshold reached; tally cleared and a skip should be raised
    ThresholdReached { votes: usize, threshold: usize },
}

/// Votes needed to skip with `listeners` people in the audience
pub fn skip_threshold(listeners: usize) -> usize {
    listeners / 4 + 1
}

#[derive(Debug, Default)]
struct TallyState {
    item: Option<Uuid>,
    voters: HashSet<String>,
}

/// Distinct-voter tally scoped to the active item
#[derive(Debug, Default)]
pub struct VoteTally {
    state: Mutex<TallyState>,
}

impl VoteTally {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scope the tally to a new item, discarding previous votes
    pub fn begin_item(&self, item: Uuid) {
        let mut state = self.lock();
        state.item = Some(item);
        state.voters.clear();
    }

    /// Clear all votes and the item scope
    pub fn reset(&self) {
        let mut state = self.lock();
        state.item = None;
        state.voters.clear();
    }

    /// Record a vote from `voter` against `item` with `listeners` in the audience
    pub fn vote(&self, item: Uuid, voter: &str, listeners: usize) -> Result<VoteOutcome, VoteError> {
        let threshold = skip_threshold(listeners);
        let mut state = self.lock();

        match state.item {
            None => return Err(VoteError::NothingPlaying),
            Some(current) if current != item => {
                debug!("Vote from {} for {} arrived after the item changed", voter, item);
                return Err(VoteError::ItemChanged);
            }
            Some(_) => {}
        }

        if !state.voters.insert(voter.to_string()) {
            return Ok(VoteOutcome::AlreadyVoted {
                votes: state.voters.len(),
                threshold,
            });
        }

        let votes = state.voters.len();
        debug!("Skip vote from {}: {}/{}", voter, votes, threshold);

        if votes >= threshold {
            state.voters.clear();
            Ok(VoteOutcome::ThresholdReached { votes, threshold })
        } else {
            Ok(VoteOutcome::Recorded { votes, threshold })
        }
    }

    pub fn votes(&self) -> usize {
        self.lock().voters.len()
    }

    pub fn active_item(&self) -> Option<Uuid> {
        self.lock().item
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TallyState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}
