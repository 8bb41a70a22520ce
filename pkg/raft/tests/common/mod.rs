use async_trait::async_trait;
use raft::errors::*;
use raft::protos::{
	AppendEntriesArgs, AppendEntriesReply, ApplyMsg, InstallSnapshotArgs, InstallSnapshotReply, RequestVoteArgs,
	RequestVoteReply, ServerId,
};
use raft::rpc::{RaftService, RpcClient};
use raft::{config::RaftConfig, persist::MemoryPersister, replica::Replica};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver};

/// In-process simulated network standing in for `labrpc`: the RPC
/// transport collaborator that delivers request/reply pairs between peers
/// and may drop, delay, or duplicate them.
#[derive(Clone, Default)]
pub struct LoopbackNetwork {
	inner: Arc<Mutex<Table>>,
}

#[derive(Default)]
struct Table {
	services: HashMap<ServerId, Arc<dyn RaftService>>,
	/// Nodes currently cut off from the network. A link is down if either
	/// endpoint is in this set, simulating a true network partition rather
	/// than a one-directional failure.
	partitioned: HashSet<ServerId>,
}

impl LoopbackNetwork {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn register(&self, id: ServerId, service: Arc<dyn RaftService>) {
		self.inner.lock().unwrap().services.insert(id, service);
	}

	pub fn partition(&self, id: ServerId) {
		self.inner.lock().unwrap().partitioned.insert(id);
	}

	pub fn heal(&self, id: ServerId) {
		self.inner.lock().unwrap().partitioned.remove(&id);
	}

	fn service_for(&self, from: ServerId, to: ServerId) -> Option<Arc<dyn RaftService>> {
		let table = self.inner.lock().unwrap();
		if table.partitioned.contains(&from) || table.partitioned.contains(&to) {
			return None;
		}
		table.services.get(&to).cloned()
	}

	pub fn handle(&self, from: ServerId) -> NetworkHandle {
		NetworkHandle { net: self.clone(), from }
	}
}

/// A single node's view of the shared `LoopbackNetwork`: knows who it is, so
/// a partition can be simulated symmetrically without the `RpcClient` trait
/// itself needing a "from" parameter.
#[derive(Clone)]
pub struct NetworkHandle {
	net: LoopbackNetwork,
	from: ServerId,
}

#[async_trait]
impl RpcClient for NetworkHandle {
	async fn request_vote(&self, peer: ServerId, args: RequestVoteArgs) -> Result<RequestVoteReply> {
		let service = self
			.net
			.service_for(self.from, peer)
			.ok_or_else(|| ErrorKind::Transport(format!("{} -> {} unreachable", self.from, peer)))?;
		Ok(service.request_vote(args).await)
	}

	async fn append_entries(&self, peer: ServerId, args: AppendEntriesArgs) -> Result<AppendEntriesReply> {
		let service = self
			.net
			.service_for(self.from, peer)
			.ok_or_else(|| ErrorKind::Transport(format!("{} -> {} unreachable", self.from, peer)))?;
		Ok(service.append_entries(args).await)
	}

	async fn install_snapshot(&self, peer: ServerId, args: InstallSnapshotArgs) -> Result<InstallSnapshotReply> {
		let service = self
			.net
			.service_for(self.from, peer)
			.ok_or_else(|| ErrorKind::Transport(format!("{} -> {} unreachable", self.from, peer)))?;
		Ok(service.install_snapshot(args).await)
	}
}

/// A fully wired-up cluster of `Replica`s sharing one `LoopbackNetwork`,
/// each with its own `MemoryPersister` and apply-channel receiver.
pub struct Cluster {
	pub net: LoopbackNetwork,
	pub replicas: HashMap<ServerId, Arc<Replica>>,
	pub apply_rx: HashMap<ServerId, UnboundedReceiver<ApplyMsg>>,
	pub persisters: HashMap<ServerId, Arc<MemoryPersister>>,
	ids: Vec<ServerId>,
}

impl Cluster {
	pub fn new(n: u64) -> Cluster {
		let net = LoopbackNetwork::new();
		let ids: Vec<ServerId> = (1..=n).collect();
		let mut replicas = HashMap::new();
		let mut apply_rx = HashMap::new();
		let mut persisters = HashMap::new();

		for &id in &ids {
			let peers: Vec<ServerId> = ids.iter().cloned().filter(|&p| p != id).collect();
			let persister = Arc::new(MemoryPersister::new());
			let (tx, rx) = mpsc::unbounded_channel();
			let replica = Replica::make(peers, id, persister.clone(), Arc::new(net.handle(id)), tx, RaftConfig::fast_for_tests());
			net.register(id, replica.clone());
			replicas.insert(id, replica);
			apply_rx.insert(id, rx);
			persisters.insert(id, persister);
		}

		Cluster { net, replicas, apply_rx, persisters, ids }
	}

	/// Restarts the replica at `id` from its existing persister, as if the
	/// process had crashed and come back up.
	pub fn restart(&mut self, id: ServerId) {
		let peers: Vec<ServerId> = self.ids.iter().cloned().filter(|&p| p != id).collect();
		let persister = self.persisters.get(&id).unwrap().clone();
		let (tx, rx) = mpsc::unbounded_channel();
		let replica = Replica::make(peers, id, persister, Arc::new(self.net.handle(id)), tx, RaftConfig::fast_for_tests());
		self.net.register(id, replica.clone());
		self.replicas.insert(id, replica);
		self.apply_rx.insert(id, rx);
	}

	/// Polls every replica's `GetState` until one reports `is_leader`, or
	/// panics after `timeout`.
	pub async fn wait_for_leader(&self, timeout: Duration) -> Arc<Replica> {
		let deadline = tokio::time::Instant::now() + timeout;
		while tokio::time::Instant::now() < deadline {
			for r in self.replicas.values() {
				if r.get_state().1 {
					return r.clone();
				}
			}
			tokio::time::sleep(Duration::from_millis(10)).await;
		}
		panic!("no leader elected within {:?}", timeout);
	}

	/// Like `wait_for_leader`, but skips the excluded ids -- used after
	/// simulating a crash so the search doesn't rediscover the dead leader.
	pub async fn wait_for_leader_excluding(&self, exclude: &[ServerId], timeout: Duration) -> Arc<Replica> {
		let deadline = tokio::time::Instant::now() + timeout;
		while tokio::time::Instant::now() < deadline {
			for (id, r) in &self.replicas {
				if !exclude.contains(id) && r.get_state().1 {
					return r.clone();
				}
			}
			tokio::time::sleep(Duration::from_millis(10)).await;
		}
		panic!("no leader elected (excluding {:?}) within {:?}", exclude, timeout);
	}
}

/// Waits for the next apply message on `rx`, panicking after `timeout`.
pub async fn expect_apply(rx: &mut UnboundedReceiver<ApplyMsg>, timeout: Duration) -> ApplyMsg {
	tokio::time::timeout(timeout, rx.recv())
		.await
		.expect("timed out waiting for an apply message")
		.expect("apply channel closed unexpectedly")
}
