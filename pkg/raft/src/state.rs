use crate::protos::{LogIndex, ServerId};
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

/// Progress the leader tracks for one other peer.
#[derive(Debug, Clone, Copy)]
pub struct PeerProgress {
	/// Next log index to send to this peer.
	pub next_index: LogIndex,

	/// Highest index known to be replicated on this peer.
	pub match_index: LogIndex,
}

impl PeerProgress {
	pub fn new(last_log_index: LogIndex) -> Self {
		PeerProgress {
			next_index: last_log_index + 1,
			match_index: 0,
		}
	}
}

#[derive(Debug)]
pub struct FollowerState {
	/// Last time we heard from a current-term leader, or granted a vote.
	pub last_heartbeat: Instant,
	pub election_timeout: Duration,

	/// Hint for `Propose`'s `NotLeader` error.
	pub last_leader_id: Option<ServerId>,
}

#[derive(Debug)]
pub struct CandidateState {
	pub election_start: Instant,
	pub election_timeout: Duration,
	pub votes_received: HashSet<ServerId>,
}

#[derive(Debug)]
pub struct LeaderState {
	pub progress: HashMap<ServerId, PeerProgress>,
}

/// Role state machine. Each variant owns exactly the
/// bookkeeping that role needs; transitioning roles replaces the whole
/// variant rather than mutating fields in place, so there is no way to
/// observe, say, leader progress while in the Follower role.
#[derive(Debug)]
pub enum RoleState {
	Follower(FollowerState),
	Candidate(CandidateState),
	Leader(LeaderState),
}

impl RoleState {
	pub fn is_leader(&self) -> bool {
		matches!(self, RoleState::Leader(_))
	}

	pub fn is_candidate(&self) -> bool {
		matches!(self, RoleState::Candidate(_))
	}
}
