use crate::errors::*;
use crate::log::Log;
use crate::protos::{LogEntry, LogIndex, ServerId, Term};
use std::sync::Mutex;

/// Wire format version of the persisted blobs. Bumped if the msgpack shape
/// below ever changes incompatibly.
const FORMAT_VERSION: u8 = 1;

#[derive(Serialize, Deserialize)]
struct PersistedRaftState {
	current_term: Term,
	voted_for: Option<ServerId>,
	last_included_index: LogIndex,
	entries: Vec<LogEntry>,
}

/// Stable-storage adapter: an opaque two-blob persister. Calls happen under
/// the replica's single mutex, since the persister is the only external
/// mutable resource the replica touches, so implementations don't need
/// their own internal locking for correctness, only for safety against
/// being handed to more than one replica (which never happens in practice).
pub trait Persister: Send + Sync {
	fn save_raft_state(&self, raft_state: Vec<u8>);
	fn save_state_and_snapshot(&self, raft_state: Vec<u8>, snapshot: Vec<u8>);
	fn read_raft_state(&self) -> Vec<u8>;
	fn read_snapshot(&self) -> Vec<u8>;
	fn raft_state_size(&self) -> usize;
}

/// In-memory reference implementation, for tests and as the obvious
/// default for anything that doesn't need real crash durability: a
/// mutex-guarded pair of buffers.
pub struct MemoryPersister {
	raft_state: Mutex<Vec<u8>>,
	snapshot: Mutex<Vec<u8>>,
}

impl MemoryPersister {
	pub fn new() -> Self {
		MemoryPersister {
			raft_state: Mutex::new(Vec::new()),
			snapshot: Mutex::new(Vec::new()),
		}
	}
}

impl Default for MemoryPersister {
	fn default() -> Self {
		Self::new()
	}
}

impl Persister for MemoryPersister {
	fn save_raft_state(&self, raft_state: Vec<u8>) {
		*self.raft_state.lock().unwrap() = raft_state;
	}

	fn save_state_and_snapshot(&self, raft_state: Vec<u8>, snapshot: Vec<u8>) {
		*self.raft_state.lock().unwrap() = raft_state;
		*self.snapshot.lock().unwrap() = snapshot;
	}

	fn read_raft_state(&self) -> Vec<u8> {
		self.raft_state.lock().unwrap().clone()
	}

	fn read_snapshot(&self) -> Vec<u8> {
		self.snapshot.lock().unwrap().clone()
	}

	fn raft_state_size(&self) -> usize {
		self.raft_state.lock().unwrap().len()
	}
}

/// Encodes (currentTerm, votedFor, log) into the durable raft-state blob.
/// Framing is a one-byte format version followed by a msgpack (rmp_serde)
/// encoding of the dense log including its sentinel.
pub fn encode_raft_state(current_term: Term, voted_for: Option<ServerId>, log: &Log) -> Vec<u8> {
	let persisted = PersistedRaftState {
		current_term,
		voted_for,
		last_included_index: log.last_included_index(),
		entries: log.dense_entries().to_vec(),
	};

	let mut out = vec![FORMAT_VERSION];
	rmp_serde::encode::write(&mut out, &persisted).expect("msgpack encode of raft state cannot fail");
	out
}

/// Decodes a raft-state blob written by `encode_raft_state`. A decode
/// failure at startup is always fatal: a replica that cannot trust its own
/// persisted term/vote/log has no safe way to participate.
pub fn decode_raft_state(bytes: &[u8]) -> Result<(Term, Option<ServerId>, Log)> {
	if bytes.is_empty() {
		return Ok((0, None, Log::new()));
	}

	let (version, body) = bytes
		.split_first()
		.ok_or_else(|| ErrorKind::DecodeFailure("raft state: empty blob".into()))?;
	if *version != FORMAT_VERSION {
		return Err(ErrorKind::DecodeFailure(format!("raft state: unknown format version {}", version)).into());
	}

	let persisted: PersistedRaftState = rmp_serde::from_slice(body)
		.map_err(|e| ErrorKind::DecodeFailure(format!("raft state: {}", e)))?;

	let log = Log::from_persisted(persisted.last_included_index, persisted.entries);
	Ok((persisted.current_term, persisted.voted_for, log))
}

#[derive(Serialize, Deserialize)]
struct PersistedSnapshot {
	last_included_index: LogIndex,
	last_included_term: Term,
	data: Vec<u8>,
}

/// Encodes a snapshot into the durable snapshot blob.
pub fn encode_snapshot(last_included_index: LogIndex, last_included_term: Term, data: &[u8]) -> Vec<u8> {
	let persisted = PersistedSnapshot {
		last_included_index,
		last_included_term,
		data: data.to_vec(),
	};

	let mut out = vec![FORMAT_VERSION];
	rmp_serde::encode::write(&mut out, &persisted).expect("msgpack encode of snapshot cannot fail");
	out
}

/// Decodes a snapshot blob. `None` means no snapshot has ever been saved.
pub fn decode_snapshot(bytes: &[u8]) -> Result<Option<crate::protos::Snapshot>> {
	if bytes.is_empty() {
		return Ok(None);
	}

	let (version, body) = bytes
		.split_first()
		.ok_or_else(|| ErrorKind::DecodeFailure("snapshot: empty blob".into()))?;
	if *version != FORMAT_VERSION {
		return Err(ErrorKind::DecodeFailure(format!("snapshot: unknown format version {}", version)).into());
	}

	let persisted: PersistedSnapshot =
		rmp_serde::from_slice(body).map_err(|e| ErrorKind::DecodeFailure(format!("snapshot: {}", e)))?;

	Ok(Some(crate::protos::Snapshot {
		last_included_index: persisted.last_included_index,
		last_included_term: persisted.last_included_term,
		data: persisted.data.into(),
	}))
}
