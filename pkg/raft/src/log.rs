use crate::protos::{LogEntry, LogIndex, Term};
use bytes::Bytes;

/// The replicated log, including a sentinel entry at local slot 0 that
/// holds no command, only the term of whatever the last snapshot covers.
/// `entries[0]` always exists and always carries `last_included_term`;
/// `entries[i]` for `i >= 1` is the entry at global index
/// `last_included_index + i`.
///
/// Mirrors `raft.go`'s `rf.Logs`: a dense slice with the same
/// sentinel-at-zero convention and the same `- rf.LastIncludedIndex`
/// translation, expressed here as its own type.
#[derive(Debug, Clone)]
pub struct Log {
	last_included_index: LogIndex,
	entries: Vec<LogEntry>,
}

impl Log {
	/// A brand new log: no snapshot, sentinel term 0.
	pub fn new() -> Self {
		Log {
			last_included_index: 0,
			entries: vec![LogEntry {
				term: 0,
				command: Bytes::new(),
			}],
		}
	}

	/// Rebuilds a log from a persisted dense entry list (sentinel
	/// included, as stored by persist.rs) and the snapshot offset it was
	/// saved under.
	pub fn from_persisted(last_included_index: LogIndex, entries: Vec<LogEntry>) -> Self {
		assert!(!entries.is_empty(), "persisted log must include the sentinel");
		Log {
			last_included_index,
			entries,
		}
	}

	pub fn last_included_index(&self) -> LogIndex {
		self.last_included_index
	}

	pub fn last_included_term(&self) -> Term {
		self.entries[0].term
	}

	/// Index of the first entry with a real command (not the sentinel).
	pub fn first_index(&self) -> LogIndex {
		self.last_included_index + 1
	}

	pub fn last_index(&self) -> LogIndex {
		self.last_included_index + (self.entries.len() as LogIndex - 1)
	}

	fn local_offset(&self, global_index: LogIndex) -> Option<usize> {
		if global_index < self.last_included_index {
			return None;
		}
		let offset = global_index - self.last_included_index;
		Some(offset as usize)
	}

	/// Term of the entry at `global_index`, or `None` if that index is
	/// before the start of what this log knows about (already
	/// compacted away) or past the end.
	pub fn term(&self, global_index: LogIndex) -> Option<Term> {
		let offset = self.local_offset(global_index)?;
		self.entries.get(offset).map(|e| e.term)
	}

	/// The full entry at `global_index`. `None` for the sentinel slot and
	/// for anything out of range.
	pub fn entry(&self, global_index: LogIndex) -> Option<&LogEntry> {
		if global_index <= self.last_included_index {
			return None;
		}
		let offset = self.local_offset(global_index)?;
		self.entries.get(offset)
	}

	/// Appends a single entry immediately after the current last index.
	pub fn append(&mut self, entry: LogEntry) {
		self.entries.push(entry);
	}

	/// Appends a run of entries immediately after the current last index.
	pub fn append_all(&mut self, new_entries: &[LogEntry]) {
		self.entries.extend_from_slice(new_entries);
	}

	/// Discards every entry at or after `global_index`, keeping the
	/// sentinel untouched. Used on divergence and on log-matching failures.
	pub fn truncate_suffix(&mut self, global_index: LogIndex) {
		if let Some(offset) = self.local_offset(global_index) {
			self.entries.truncate(offset.min(self.entries.len()));
		}
	}

	/// Discards every entry up to and including `through_index`, folding
	/// `new_sentinel_term` into the sentinel slot. `through_index` must be
	/// <= last_index(); entries beyond it are kept.
	pub fn truncate_prefix_through(&mut self, through_index: LogIndex, new_sentinel_term: Term) {
		debug_assert!(through_index >= self.last_included_index);
		debug_assert!(through_index <= self.last_index());

		let keep_from = (through_index - self.last_included_index) as usize;
		self.entries.drain(0..keep_from);
		self.entries[0] = LogEntry {
			term: new_sentinel_term,
			command: Bytes::new(),
		};
		self.last_included_index = through_index;
	}

	/// Discards every entry, keeping only a fresh sentinel for
	/// `new_last_included_index`/`new_sentinel_term`. Used when a follower
	/// can't splice a received snapshot onto what it already has.
	pub fn reset_to_snapshot(&mut self, new_last_included_index: LogIndex, new_sentinel_term: Term) {
		self.entries.clear();
		self.entries.push(LogEntry {
			term: new_sentinel_term,
			command: Bytes::new(),
		});
		self.last_included_index = new_last_included_index;
	}

	/// Dense entry list including the sentinel, as persist.rs needs it.
	pub fn dense_entries(&self) -> &[LogEntry] {
		&self.entries
	}
}

impl Default for Log {
	fn default() -> Self {
		Self::new()
	}
}
