use crate::errors::*;
use crate::protos::{
	AppendEntriesArgs, AppendEntriesReply, InstallSnapshotArgs, InstallSnapshotReply, RequestVoteArgs,
	RequestVoteReply, ServerId,
};
use async_trait::async_trait;

/// The RPC transport collaborator: delivers request/reply pairs between
/// peers and may drop, delay, or duplicate them. Raft only ever calls
/// through `Arc<dyn RpcClient>`, so a single implementation can stand in for
/// every peer connection, or tests can wire up an in-process loopback (see
/// `tests/`).
///
/// `async_trait` boxes the futures so this trait stays object-safe on
/// stable Rust -- it has to be a trait object (`Arc<dyn RpcClient>` per
/// peer) since the transport is supplied externally.
#[async_trait]
pub trait RpcClient: Send + Sync {
	async fn request_vote(&self, peer: ServerId, args: RequestVoteArgs) -> Result<RequestVoteReply>;

	async fn append_entries(&self, peer: ServerId, args: AppendEntriesArgs) -> Result<AppendEntriesReply>;

	async fn install_snapshot(&self, peer: ServerId, args: InstallSnapshotArgs) -> Result<InstallSnapshotReply>;
}

/// The inbound half of the RPC surface: what a transport calls into once it
/// has decoded a peer's request. `replica.rs`'s `Replica` is the only
/// implementation, so a transport just needs `Arc<dyn RaftService>` to route
/// decoded requests without depending on `Replica` directly.
#[async_trait]
pub trait RaftService: Send + Sync {
	async fn request_vote(&self, args: RequestVoteArgs) -> RequestVoteReply;

	async fn append_entries(&self, args: AppendEntriesArgs) -> AppendEntriesReply;

	async fn install_snapshot(&self, args: InstallSnapshotArgs) -> InstallSnapshotReply;
}
