// std
use std::sync::atomic::{AtomicU64, Ordering::Relaxed};

/// Point-in-time copy of [`RefreshMetrics`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RefreshCounts {
	/// `ensure_valid` calls.
	pub calls: u64,
	/// Refresh requests sent to the token endpoint.
	pub network_refreshes: u64,
	/// Refresh requests that produced a new token.
	pub successes: u64,
	/// Refresh requests that failed.
	pub failures: u64,
}
impl RefreshCounts {
	/// Calls answered without contacting the token endpoint.
	pub fn served_from_memory(&self) -> u64 {
		self.calls.saturating_sub(self.network_refreshes)
	}
}

/// Lock-free counters describing how `ensure_valid` calls were resolved.
#[derive(Debug, Default)]
pub struct RefreshMetrics {
	calls: AtomicU64,
	network_refreshes: AtomicU64,
	successes: AtomicU64,
	failures: AtomicU64,
}
impl RefreshMetrics {
	/// Number of `ensure_valid` calls.
	pub fn attempts(&self) -> u64 {
		self.calls.load(Relaxed)
	}

	/// Number of refresh requests actually sent to the token endpoint.
	pub fn network_refreshes(&self) -> u64 {
		self.network_refreshes.load(Relaxed)
	}

	/// Number of refresh requests that produced a new token.
	pub fn successes(&self) -> u64 {
		self.successes.load(Relaxed)
	}

	/// Number of refresh requests that failed.
	pub fn failures(&self) -> u64 {
		self.failures.load(Relaxed)
	}

	/// Copies every counter at once.
	pub fn snapshot(&self) -> RefreshCounts {
		RefreshCounts {
			calls: self.attempts(),
			network_refreshes: self.network_refreshes(),
			successes: self.successes(),
			failures: self.failures(),
		}
	}

	pub(crate) fn record_attempt(&self) {
		self.calls.fetch_add(1, Relaxed);
	}

	pub(crate) fn record_network_refresh(&self) {
		self.network_refreshes.fetch_add(1, Relaxed);
	}

	pub(crate) fn record_success(&self) {
		self.successes.fetch_add(1, Relaxed);
	}

	pub(crate) fn record_failure(&self) {
		self.failures.fetch_add(1, Relaxed);
	}
}
