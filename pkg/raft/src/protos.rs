use bytes::Bytes;

/// Type used to uniquely identify each server. Assigned externally (by
/// whatever bootstraps the cluster); Raft itself never allocates one.
pub type ServerId = u64;

pub type Term = u64;

pub type LogIndex = u64;

/// (term, command) pair at a unique monotonic index. A plain opaque command
/// is all a log entry ever holds: membership change is out of scope, and
/// prior-term entries commit transitively rather than via a leader no-op,
/// so there's no need for a tagged entry-kind enum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
	pub term: Term,

	/// Opaque payload, transported and persisted verbatim.
	pub command: Bytes,
}

/// (term, index) pair identifying a single proposed entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogPosition {
	pub term: Term,
	pub index: LogIndex,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestVoteArgs {
	pub term: Term,
	pub candidate_id: ServerId,
	pub last_log_index: LogIndex,
	pub last_log_term: Term,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RequestVoteReply {
	pub term: Term,

	/// Echoes args.term. Gates vote-count increments: a reply is only
	/// ever counted if received_term == the candidate's current_term at
	/// the time the reply arrives.
	pub received_term: Term,

	pub vote_granted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntriesArgs {
	pub term: Term,
	pub leader_id: ServerId,
	pub prev_log_index: LogIndex,
	pub prev_log_term: Term,
	pub entries: Vec<LogEntry>,
	pub leader_commit: LogIndex,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AppendEntriesReply {
	pub term: Term,
	pub received_term: Term,
	pub success: bool,

	/// Set when prev_log_index predates the follower's snapshot. The
	/// leader must not retry with the same prev_log_index; it should fall
	/// through to InstallSnapshot instead.
	pub snapshot_prefix: bool,

	/// A hint for how far to roll nextIndex back on failure. A plain
	/// decrement-by-one per rejected AppendEntries is always a valid
	/// fallback; this hint just lets the leader skip straight to a likely
	/// match point instead of walking back one index per tick. A term
	/// mismatch hints the follower's current commit_index, and a
	/// too-short log hints the follower's actual last index. `None` when
	/// success is true, or when the plain decrement is used instead (see
	/// `ConsensusModule`).
	pub hint_index: Option<LogIndex>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallSnapshotArgs {
	pub term: Term,
	pub leader_id: ServerId,
	pub last_included_index: LogIndex,
	pub last_included_term: Term,

	/// Opaque upper-layer state. No extension fields -- exposing
	/// upper-layer bookkeeping like serial numbers or a config generation
	/// here would couple this crate to a specific upper layer.
	pub data: Bytes,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct InstallSnapshotReply {
	pub term: Term,
	pub is_applied: bool,
}

/// A decoded snapshot, as produced by the upper layer (SaveSnapshot) or
/// received over the wire (InstallSnapshot).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
	pub last_included_index: LogIndex,
	pub last_included_term: Term,
	pub data: Bytes,
}

/// Tagged union delivered to the upper layer.
#[derive(Debug, Clone)]
pub enum ApplyMsg {
	Command {
		command: Bytes,
		index: LogIndex,
		term: Term,
	},
	Snapshot(Snapshot),
}
