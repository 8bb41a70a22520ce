use crate::config::RaftConfig;
use crate::consensus::{ConsensusModule, PeerPlan};
use crate::persist::{decode_raft_state, decode_snapshot, Persister};
use crate::protos::{
	AppendEntriesArgs, AppendEntriesReply, ApplyMsg, InstallSnapshotArgs, InstallSnapshotReply, LogEntry, LogIndex,
	LogPosition, RequestVoteArgs, RequestVoteReply, ServerId, Snapshot, Term,
};
use crate::rpc::{RaftService, RpcClient};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::mpsc::UnboundedSender;

/// The public replica handle: the operations an upper-layer service drives
/// this crate through. Wraps a `ConsensusModule` behind the single
/// coarse-grained mutex and owns the background tasks that drive elections,
/// heartbeats, replication, commit advancement, and applies.
///
/// Plays the role of `raft.go`'s `Raft`/server pair, but built on stable
/// `tokio::spawn` tasks with each background loop talking to
/// `ConsensusModule` directly (see consensus.rs's doc comment for why).
pub struct Replica {
	id: ServerId,
	peers: Vec<ServerId>,
	config: RaftConfig,
	inner: Mutex<ConsensusModule>,
	persister: Arc<dyn Persister>,
	rpc: Arc<dyn RpcClient>,
	apply_tx: UnboundedSender<ApplyMsg>,
}

impl Replica {
	/// `Make`: loads whatever the persister has on disk (or the
	/// fresh-replica defaults), spawns the background loops, and returns
	/// promptly.
	pub fn make(
		peers: Vec<ServerId>,
		me: ServerId,
		persister: Arc<dyn Persister>,
		rpc: Arc<dyn RpcClient>,
		apply_tx: UnboundedSender<ApplyMsg>,
		config: RaftConfig,
	) -> Arc<Replica> {
		let raw_state = persister.read_raft_state();
		// A decode failure on startup is fatal: a replica that
		// can't trust its own persisted term/vote/log has no safe way to
		// participate.
		let (current_term, voted_for, log) =
			decode_raft_state(&raw_state).expect("fatal: failed to decode persisted raft state on startup");

		let cm = ConsensusModule::new(me, peers.clone(), config, current_term, voted_for, log, Instant::now());

		let replica = Arc::new(Replica {
			id: me,
			peers,
			config,
			inner: Mutex::new(cm),
			persister,
			rpc,
			apply_tx,
		});

		// If a snapshot was installed before the last restart, the first
		// thing delivered to the upper layer after Make must be that
		// snapshot, ahead of any entries above it.
		if let Ok(Some(snapshot)) = decode_snapshot(&replica.persister.read_snapshot()) {
			let _ = replica.apply_tx.send(ApplyMsg::Snapshot(snapshot));
		}

		spawn_background_tasks(&replica);
		replica
	}

	pub fn id(&self) -> ServerId {
		self.id
	}

	/// `Propose`. A non-leader returns `is_leader = false` with
	/// the sentinel `(0, 0)` indices.
	pub fn propose(&self, command: Bytes) -> (LogIndex, Term, bool) {
		let mut cm = self.inner.lock().unwrap();
		match cm.propose(command, self.persister.as_ref()) {
			Ok(LogPosition { term, index }) => (index, term, true),
			Err(_) => (0, 0, false),
		}
	}

	/// `GetState`.
	pub fn get_state(&self) -> (Term, bool) {
		self.inner.lock().unwrap().get_state()
	}

	/// `Kill`: best-effort, idempotent. Every background loop
	/// notices `is_alive() == false` the next time it reacquires the lock
	/// and exits.
	pub fn kill(&self) {
		self.inner.lock().unwrap().kill();
	}

	pub fn is_alive(&self) -> bool {
		self.inner.lock().unwrap().is_alive()
	}

	/// `SaveSnapshot`. Idempotent under a stale
	/// `last_included_index` (already-covered or ahead-of-log calls are
	/// silently dropped by `ConsensusModule::save_snapshot`).
	pub fn save_snapshot(&self, last_included_index: LogIndex, last_included_term: Term, data: &[u8]) -> bool {
		let mut cm = self.inner.lock().unwrap();
		cm.save_snapshot(last_included_index, last_included_term, data, self.persister.as_ref())
	}

	/// `GetSnapshot`.
	pub fn get_snapshot(&self) -> Option<Snapshot> {
		decode_snapshot(&self.persister.read_snapshot()).ok().flatten()
	}

	/// `GetStateSize`: lets the upper layer decide when to
	/// trigger a snapshot.
	pub fn get_state_size(&self) -> usize {
		self.persister.raft_state_size()
	}

	/// Debug accessor, as `raft.go`'s `GetLogs()` provides. Not part of
	/// the protocol surface.
	pub fn debug_log(&self) -> Vec<LogEntry> {
		self.inner.lock().unwrap().debug_log()
	}

	/// Debug accessor, as `raft.go`'s `printState()` provides.
	pub fn debug_state(&self) -> String {
		self.inner.lock().unwrap().debug_state()
	}
}

#[async_trait]
impl RaftService for Replica {
	async fn request_vote(&self, args: RequestVoteArgs) -> RequestVoteReply {
		let mut cm = self.inner.lock().unwrap();
		cm.request_vote(args, Instant::now(), self.persister.as_ref())
	}

	async fn append_entries(&self, args: AppendEntriesArgs) -> AppendEntriesReply {
		let mut cm = self.inner.lock().unwrap();
		cm.append_entries(args, Instant::now(), self.persister.as_ref())
	}

	async fn install_snapshot(&self, args: InstallSnapshotArgs) -> InstallSnapshotReply {
		let (reply, snapshot) = {
			let mut cm = self.inner.lock().unwrap();
			cm.handle_install_snapshot(args, Instant::now(), self.persister.as_ref())
		};
		if let Some(snapshot) = snapshot {
			let _ = self.apply_tx.send(ApplyMsg::Snapshot(snapshot));
		}
		reply
	}
}

fn spawn_background_tasks(replica: &Arc<Replica>) {
	tokio::spawn(election_watcher_loop(replica.clone()));
	tokio::spawn(heartbeat_loop(replica.clone()));
	tokio::spawn(replicate_loop(replica.clone()));
	tokio::spawn(commit_advance_loop(replica.clone()));
	tokio::spawn(apply_pump_loop(replica.clone()));
}

/// Election watcher: polls at a short fixed cadence; once
/// `now - last_heard >= election_timeout` for a Follower or Candidate, fans
/// out `RequestVote`.
async fn election_watcher_loop(replica: Arc<Replica>) {
	loop {
		let poll_interval = {
			let cm = replica.inner.lock().unwrap();
			if !cm.is_alive() {
				return;
			}
			replica.config.election_poll_interval
		};
		tokio::time::sleep(poll_interval).await;

		let args = {
			let mut cm = replica.inner.lock().unwrap();
			if !cm.is_alive() {
				return;
			}
			if cm.election_due(Instant::now()) {
				cm.start_election(Instant::now(), replica.persister.as_ref())
			} else {
				None
			}
		};

		// `start_election` returns `None` both for the single-node-cluster
		// case (already became leader) and simply because no
		// election was due this tick; either way there's nothing to fan out.
		if let Some(args) = args {
			fan_out_request_vote(&replica, args);
		}
	}
}

fn fan_out_request_vote(replica: &Arc<Replica>, args: RequestVoteArgs) {
	for &peer in &replica.peers {
		let replica = replica.clone();
		let args = args.clone();
		tokio::spawn(async move {
			if let Ok(reply) = replica.rpc.request_vote(peer, args).await {
				let mut cm = replica.inner.lock().unwrap();
				if cm.is_alive() {
					cm.request_vote_reply(peer, reply, Instant::now(), replica.persister.as_ref());
				}
			}
			// No reply, nothing to retry --
			// the next election timeout will try again if this one doesn't
			// win.
		});
	}
}

/// Heartbeat loop: every peer gets an `AppendEntries` (or
/// `InstallSnapshot`) every tick regardless of backlog, so followers keep
/// resetting their election deadlines even when there's nothing new to
/// ship.
async fn heartbeat_loop(replica: Arc<Replica>) {
	loop {
		let interval = {
			let cm = replica.inner.lock().unwrap();
			if !cm.is_alive() {
				return;
			}
			replica.config.heartbeat_interval
		};
		tokio::time::sleep(interval).await;

		let plans = {
			let cm = replica.inner.lock().unwrap();
			if !cm.is_alive() {
				return;
			}
			cm.peer_replication_plan()
		};
		for plan in plans {
			dispatch_plan(&replica, plan);
		}
	}
}

/// Entry-shipping loop: short period, only contacts peers that
/// actually have a backlog (`last_log_index >= next_index[p]`) or need a
/// snapshot.
async fn replicate_loop(replica: Arc<Replica>) {
	loop {
		let interval = {
			let cm = replica.inner.lock().unwrap();
			if !cm.is_alive() {
				return;
			}
			replica.config.replicate_interval
		};
		tokio::time::sleep(interval).await;

		let plans = {
			let cm = replica.inner.lock().unwrap();
			if !cm.is_alive() {
				return;
			}
			cm.peer_replication_plan()
		};
		for plan in plans {
			let has_backlog = match &plan {
				PeerPlan::AppendEntries { args, .. } => !args.entries.is_empty(),
				PeerPlan::Snapshot { .. } => true,
			};
			if has_backlog {
				dispatch_plan(&replica, plan);
			}
		}
	}
}

fn dispatch_plan(replica: &Arc<Replica>, plan: PeerPlan) {
	match plan {
		PeerPlan::AppendEntries { peer, args } => {
			let sent_prev_log_index = args.prev_log_index;
			let sent_entries_len = args.entries.len();
			let replica = replica.clone();
			tokio::spawn(async move {
				if let Ok(reply) = replica.rpc.append_entries(peer, args).await {
					let mut cm = replica.inner.lock().unwrap();
					if cm.is_alive() {
						cm.append_entries_reply(peer, sent_prev_log_index, sent_entries_len, reply, Instant::now(), replica.persister.as_ref());
					}
				}
			});
		}
		PeerPlan::Snapshot { peer } => {
			let replica = replica.clone();
			tokio::spawn(async move {
				let (sent_last_included_index, args) = {
					let cm = replica.inner.lock().unwrap();
					if !cm.is_alive() {
						return;
					}
					// `read_snapshot` returns the persisted blob (format version +
					// msgpack envelope); only the inner opaque state belongs on the
					// wire, the same bytes the restart path decodes before
					// redelivering them.
					let snapshot_data = match decode_snapshot(&replica.persister.read_snapshot()) {
						Ok(Some(snapshot)) => snapshot.data,
						_ => return,
					};
					(cm.log().last_included_index(), cm.install_snapshot_args(snapshot_data))
				};
				if let Ok(reply) = replica.rpc.install_snapshot(peer, args).await {
					let mut cm = replica.inner.lock().unwrap();
					if cm.is_alive() {
						cm.install_snapshot_reply(peer, sent_last_included_index, reply, Instant::now(), replica.persister.as_ref());
					}
				}
			});
		}
	}
}

/// Leader commit-index advancement: scans for the largest
/// index backed by a quorum of `match_index` within the leader's own term.
async fn commit_advance_loop(replica: Arc<Replica>) {
	loop {
		let interval = {
			let cm = replica.inner.lock().unwrap();
			if !cm.is_alive() {
				return;
			}
			replica.config.commit_check_interval
		};
		tokio::time::sleep(interval).await;

		let mut cm = replica.inner.lock().unwrap();
		if !cm.is_alive() {
			return;
		}
		if let Some(n) = cm.find_next_commit_index() {
			cm.set_commit_index(n);
		}
	}
}

/// Apply pump: delivers committed entries to the upper layer in strict
/// index order, exactly once. Sends directly on the unbounded channel
/// rather than spawning a task per message -- an unbounded `mpsc` send
/// never blocks, so there is nothing for a spawned task to buy here, and a
/// direct send trivially preserves ordering (a bounded buffered channel
/// drained in order would work just as well).
async fn apply_pump_loop(replica: Arc<Replica>) {
	loop {
		let interval = {
			let cm = replica.inner.lock().unwrap();
			if !cm.is_alive() {
				return;
			}
			replica.config.apply_interval
		};
		tokio::time::sleep(interval).await;

		loop {
			let next = {
				let mut cm = replica.inner.lock().unwrap();
				if !cm.is_alive() {
					return;
				}
				cm.next_to_apply()
			};
			match next {
				Some((index, term, command)) => {
					if replica.apply_tx.send(ApplyMsg::Command { command, index, term }).is_err() {
						// Upper layer dropped its receiver; nothing more we
						// can do but stop trying to deliver.
						return;
					}
				}
				None => break,
			}
		}
	}
}
