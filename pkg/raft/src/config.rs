use std::time::Duration;

/// Tunable timings, gathered into a struct (rather than module consts) so
/// tests can shrink them instead of waiting out real multi-hundred-
/// millisecond timeouts.
#[derive(Debug, Clone, Copy)]
pub struct RaftConfig {
	/// Random election timeout is drawn uniformly from
	/// `[election_timeout_min, election_timeout_max)` on every reset.
	pub election_timeout_min: Duration,
	pub election_timeout_max: Duration,

	/// How often the election watcher polls for an expired deadline.
	pub election_poll_interval: Duration,

	/// Period of the leader's heartbeat loop.
	pub heartbeat_interval: Duration,

	/// Period of the leader's entry-shipping loop.
	pub replicate_interval: Duration,

	/// Period of the leader's commit-index advancement loop.
	pub commit_check_interval: Duration,

	/// Period of the per-replica apply pump.
	pub apply_interval: Duration,
}

impl Default for RaftConfig {
	fn default() -> Self {
		RaftConfig {
			election_timeout_min: Duration::from_millis(500),
			election_timeout_max: Duration::from_millis(800),
			election_poll_interval: Duration::from_millis(10),
			heartbeat_interval: Duration::from_millis(200),
			replicate_interval: Duration::from_millis(30),
			commit_check_interval: Duration::from_millis(10),
			apply_interval: Duration::from_millis(10),
		}
	}
}

impl RaftConfig {
	/// Timings scaled down for tests that need many elections/commits to
	/// happen inside a normal test timeout.
	pub fn fast_for_tests() -> Self {
		RaftConfig {
			election_timeout_min: Duration::from_millis(40),
			election_timeout_max: Duration::from_millis(80),
			election_poll_interval: Duration::from_millis(2),
			heartbeat_interval: Duration::from_millis(15),
			replicate_interval: Duration::from_millis(5),
			commit_check_interval: Duration::from_millis(2),
			apply_interval: Duration::from_millis(2),
		}
	}
}
