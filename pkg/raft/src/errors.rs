// The RPC client and persister are external trait objects here rather than
// concrete I/O types, so there are no foreign Io/HTTP links -- just the local
// error kinds the consensus core raises directly.

error_chain! {
	errors {
		/// The startup blob on stable storage could not be decoded. Always
		/// fatal: a replica with a corrupt persisted state has no safe way
		/// to participate in the cluster.
		DecodeFailure(what: String) {
			description("failed to decode a persisted blob")
			display("failed to decode {}", what)
		}

		/// A persister call did not durably complete. Fatal: the invariant
		/// that durable state precedes any externalized reply can no
		/// longer be honored once this happens.
		PersistenceFailure(what: String) {
			description("persistence operation failed")
			display("persistence failure: {}", what)
		}

		/// Raised by the RPC client side when a peer never replies; the
		/// periodic loops treat this as transient and simply retry on the
		/// next tick.
		Transport(what: String) {
			description("rpc transport error")
			display("transport error: {}", what)
		}
	}
}
