//! Rate-limit budget tracking fed by every API response.
//!
//! The tracker keeps the most recently observed [`RateLimitSnapshot`] behind a lock that is
//! only held for the single read or write. The optional observer runs after the lock is
//! released, so a slow callback never blocks readers or other writers.
//!
//! Header contract (names are case-insensitive):
//!
//! - `X-RateLimit-Limit`: requests allowed per window.
//! - `X-RateLimit-Remaining`: requests left in the window.
//! - `X-RateLimit-Reset`: an integer interpreted as Unix epoch milliseconds when at least
//!   `10^12`, Unix epoch seconds when at least `10^9`, and milliseconds from now otherwise.
//!
//! A `429` carrying `Retry-After` without any of the headers above yields a snapshot with no
//! remaining budget that resets at the hinted instant.

// std
use std::time::Duration as StdDuration;
// crates.io
use oauth2::http::{HeaderMap, header::RETRY_AFTER};
use time::format_description::well_known::Rfc2822;
// self
use crate::{_prelude::*, context::CallContext, obs};

/// Header carrying the window size.
pub const LIMIT_HEADER: &str = "x-ratelimit-limit";
/// Header carrying the remaining budget.
pub const REMAINING_HEADER: &str = "x-ratelimit-remaining";
/// Header carrying the reset time.
pub const RESET_HEADER: &str = "x-ratelimit-reset";

const EPOCH_MILLIS_FLOOR: i64 = 1_000_000_000_000;
const EPOCH_SECONDS_FLOOR: i64 = 1_000_000_000;

/// Callback invoked once per snapshot update. May run concurrently from many tasks.
pub type RateLimitObserver = Arc<dyn Fn(&RateLimitSnapshot) + Send + Sync>;

/// Latest rate-limit signals reported by the API.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimitSnapshot {
	/// Requests allowed per window.
	pub limit: Option<u64>,
	/// Requests left in the current window.
	pub remaining: Option<u64>,
	/// Instant when the window resets.
	pub reset_at: Option<OffsetDateTime>,
	/// Instant the snapshot was taken.
	pub observed_at: OffsetDateTime,
}
impl RateLimitSnapshot {
	/// Extracts a snapshot from response headers, or `None` when the response carries no
	/// usable rate-limit signal.
	pub fn from_headers(status: u16, headers: &HeaderMap, now: OffsetDateTime) -> Option<Self> {
		let limit = header_int(headers, LIMIT_HEADER).and_then(|value| u64::try_from(value).ok());
		let remaining =
			header_int(headers, REMAINING_HEADER).and_then(|value| u64::try_from(value).ok());
		let reset_at = header_int(headers, RESET_HEADER).and_then(|value| reset_instant(value, now));

		if remaining.is_some() || reset_at.is_some() {
			return Some(Self { limit, remaining, reset_at, observed_at: now });
		}
		if status == 429 {
			let retry_after = retry_after(headers, now)?;

			return Some(Self {
				limit,
				remaining: Some(0),
				reset_at: Some(now + retry_after),
				observed_at: now,
			});
		}

		None
	}

	/// Returns `true` when the remaining budget is known and at or below `threshold`.
	pub fn should_throttle(&self, threshold: u64) -> bool {
		self.remaining.is_some_and(|remaining| remaining <= threshold)
	}

	/// Time to wait before the budget resets, or `None` when no wait is needed.
	pub fn wait_duration(&self, now: OffsetDateTime) -> Option<StdDuration> {
		if self.remaining != Some(0) {
			return None;
		}

		let delta = self.reset_at? - now;

		if delta.is_positive() { StdDuration::try_from(delta).ok() } else { None }
	}
}

/// Thread-safe holder for the latest [`RateLimitSnapshot`].
#[derive(Default)]
pub struct RateLimitTracker {
	snapshot: RwLock<Option<RateLimitSnapshot>>,
	observer: Option<RateLimitObserver>,
}
impl RateLimitTracker {
	/// Creates a tracker with no observer.
	pub fn new() -> Self {
		Self::default()
	}

	/// Creates a tracker that notifies `observer` after every update.
	pub fn with_observer(observer: RateLimitObserver) -> Self {
		Self { snapshot: Default::default(), observer: Some(observer) }
	}

	/// Feeds one response into the tracker, returning the new snapshot when one was recorded.
	pub fn record(&self, status: u16, headers: &HeaderMap) -> Option<RateLimitSnapshot> {
		let snapshot = RateLimitSnapshot::from_headers(status, headers, OffsetDateTime::now_utc())?;

		self.update(snapshot);

		Some(snapshot)
	}

	/// Replaces the current snapshot and notifies the observer outside the lock.
	pub fn update(&self, snapshot: RateLimitSnapshot) {
		*self.snapshot.write() = Some(snapshot);

		if let Some(remaining) = snapshot.remaining {
			obs::record_rate_limit_remaining(remaining);
		}
		if let Some(observer) = &self.observer {
			observer(&snapshot);
		}
	}

	/// Latest snapshot, if any response carried rate-limit headers.
	pub fn snapshot(&self) -> Option<RateLimitSnapshot> {
		*self.snapshot.read()
	}

	/// Requests left in the current window.
	pub fn remaining(&self) -> Option<u64> {
		self.snapshot().and_then(|snapshot| snapshot.remaining)
	}

	/// Requests allowed per window.
	pub fn limit(&self) -> Option<u64> {
		self.snapshot().and_then(|snapshot| snapshot.limit)
	}

	/// Instant when the current window resets.
	pub fn reset_at(&self) -> Option<OffsetDateTime> {
		self.snapshot().and_then(|snapshot| snapshot.reset_at)
	}

	/// Returns `true` when the remaining budget is known and at or below `threshold`.
	pub fn should_throttle(&self, threshold: u64) -> bool {
		self.snapshot().is_some_and(|snapshot| snapshot.should_throttle(threshold))
	}

	/// Sleeps until the window resets when the budget is exhausted.
	///
	/// Returns immediately when budget remains, when nothing has been observed, or when the
	/// reset time already passed. The sleep observes `ctx`.
	pub async fn wait_for_rate_limit(&self, ctx: &CallContext) -> Result<()> {
		ctx.check()?;

		let Some(delay) =
			self.snapshot().and_then(|snapshot| snapshot.wait_duration(OffsetDateTime::now_utc()))
		else {
			return Ok(());
		};

		obs::event!(debug, delay_ms = delay.as_millis() as u64, "Waiting for rate-limit reset.");

		ctx.sleep(delay).await?;

		Ok(())
	}
}
impl Debug for RateLimitTracker {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RateLimitTracker")
			.field("snapshot", &self.snapshot())
			.field("observer", &self.observer.is_some())
			.finish()
	}
}

fn header_int(headers: &HeaderMap, name: &str) -> Option<i64> {
	headers.get(name)?.to_str().ok()?.trim().parse().ok()
}

fn reset_instant(value: i64, now: OffsetDateTime) -> Option<OffsetDateTime> {
	if value >= EPOCH_MILLIS_FLOOR {
		OffsetDateTime::from_unix_timestamp_nanos(i128::from(value) * 1_000_000).ok()
	} else if value >= EPOCH_SECONDS_FLOOR {
		OffsetDateTime::from_unix_timestamp(value).ok()
	} else if value >= 0 {
		now.checked_add(Duration::milliseconds(value))
	} else {
		None
	}
}

fn retry_after(headers: &HeaderMap, now: OffsetDateTime) -> Option<Duration> {
	let raw = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();

	if let Ok(secs) = raw.parse::<u32>() {
		return Some(Duration::seconds(i64::from(secs)));
	}

	let moment = OffsetDateTime::parse(raw, &Rfc2822).ok()?;
	let delta = moment - now;

	Some(if delta.is_positive() { delta } else { Duration::ZERO })
}

#[cfg(test)]
mod tests {
	// std
	use std::sync::{
		OnceLock,
		atomic::{AtomicUsize, Ordering},
	};
	// crates.io
	use oauth2::http::{HeaderName, HeaderValue};
	use time::macros::datetime;
	use tokio::time::Instant;
	// self
	use super::*;
	use crate::error::Cancellation;

	fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
		let mut map = HeaderMap::new();

		for (name, value) in pairs {
			map.insert(
				HeaderName::from_bytes(name.as_bytes()).expect("Header name fixture should parse."),
				HeaderValue::from_str(value).expect("Header value fixture should parse."),
			);
		}

		map
	}

	#[test]
	fn parses_relative_and_absolute_reset_values() {
		let now = datetime!(2025-01-01 0:00 UTC);
		let relative = RateLimitSnapshot::from_headers(
			200,
			&headers(&[("X-RateLimit-Limit", "250"), ("X-RateLimit-Remaining", "249"), (
				"X-RateLimit-Reset",
				"1500",
			)]),
			now,
		)
		.expect("Relative reset should parse.");

		assert_eq!(relative.limit, Some(250));
		assert_eq!(relative.remaining, Some(249));
		assert_eq!(relative.reset_at, Some(now + Duration::milliseconds(1500)));

		let seconds = RateLimitSnapshot::from_headers(
			200,
			&headers(&[("x-ratelimit-reset", "1735689600")]),
			now,
		)
		.expect("Epoch seconds should parse.");

		assert_eq!(seconds.reset_at, Some(datetime!(2025-01-01 0:00 UTC)));

		let millis = RateLimitSnapshot::from_headers(
			200,
			&headers(&[("x-ratelimit-reset", "1735689600500")]),
			now,
		)
		.expect("Epoch milliseconds should parse.");

		assert_eq!(millis.reset_at, Some(now + Duration::milliseconds(500)));
	}

	#[test]
	fn responses_without_signals_are_ignored() {
		let now = OffsetDateTime::now_utc();

		assert!(RateLimitSnapshot::from_headers(200, &HeaderMap::new(), now).is_none());
		assert!(
			RateLimitSnapshot::from_headers(200, &headers(&[("x-ratelimit-limit", "10")]), now)
				.is_none()
		);
		assert!(
			RateLimitSnapshot::from_headers(503, &headers(&[("retry-after", "5")]), now).is_none()
		);
	}

	#[test]
	fn retry_after_on_429_exhausts_budget() {
		let now = datetime!(2025-01-01 0:00 UTC);
		let snapshot =
			RateLimitSnapshot::from_headers(429, &headers(&[("Retry-After", "7")]), now)
				.expect("Retry-After should produce a snapshot.");

		assert_eq!(snapshot.remaining, Some(0));
		assert_eq!(snapshot.reset_at, Some(now + Duration::seconds(7)));
		assert!(snapshot.should_throttle(0));
	}

	#[test]
	fn throttle_threshold_is_inclusive() {
		let tracker = RateLimitTracker::new();

		assert!(!tracker.should_throttle(10), "Unknown budget never throttles.");

		tracker.record(200, &headers(&[("x-ratelimit-remaining", "10")]));

		assert!(tracker.should_throttle(10));
		assert!(!tracker.should_throttle(9));
		assert_eq!(tracker.remaining(), Some(10));
	}

	#[test]
	fn observer_runs_outside_the_lock() {
		let calls = Arc::new(AtomicUsize::new(0));
		let slot: Arc<OnceLock<Arc<RateLimitTracker>>> = Default::default();
		let observer: RateLimitObserver = {
			let calls = calls.clone();
			let slot = slot.clone();

			Arc::new(move |snapshot: &RateLimitSnapshot| {
				if let Some(tracker) = slot.get() {
					assert_eq!(tracker.remaining(), snapshot.remaining);
				}

				calls.fetch_add(1, Ordering::SeqCst);
			})
		};
		let tracker = Arc::new(RateLimitTracker::with_observer(observer));

		slot.set(tracker.clone()).unwrap_or_else(|_| panic!("Slot should be empty."));
		tracker.record(200, &headers(&[("x-ratelimit-remaining", "3")]));
		tracker.record(200, &HeaderMap::new());
		tracker.record(200, &headers(&[("x-ratelimit-remaining", "2")]));

		assert_eq!(calls.load(Ordering::SeqCst), 2);
		assert_eq!(tracker.remaining(), Some(2));
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
	async fn observer_tolerates_concurrent_records() {
		const TASKS: u64 = 64;

		let calls = Arc::new(AtomicUsize::new(0));
		let slot: Arc<OnceLock<Arc<RateLimitTracker>>> = Default::default();
		let observer: RateLimitObserver = {
			let calls = calls.clone();
			let slot = slot.clone();

			Arc::new(move |snapshot: &RateLimitSnapshot| {
				assert!(snapshot.remaining.is_some_and(|remaining| remaining < TASKS));

				if let Some(tracker) = slot.get() {
					assert!(tracker.should_throttle(TASKS), "Tracker should be readable here.");
				}

				calls.fetch_add(1, Ordering::SeqCst);
			})
		};
		let tracker = Arc::new(RateLimitTracker::with_observer(observer));

		slot.set(tracker.clone()).unwrap_or_else(|_| panic!("Slot should be empty."));

		let tasks = (0..TASKS)
			.map(|remaining| {
				let tracker = tracker.clone();

				tokio::spawn(async move {
					let remaining = remaining.to_string();

					tracker.record(200, &headers(&[("x-ratelimit-remaining", remaining.as_str())]));
				})
			})
			.collect::<Vec<_>>();
		let all = async {
			for task in tasks {
				task.await.expect("Recording task should not panic.");
			}
		};

		tokio::time::timeout(StdDuration::from_secs(5), all)
			.await
			.expect("Concurrent records must not deadlock.");

		assert_eq!(calls.load(Ordering::SeqCst), TASKS as usize);
		assert!(tracker.remaining().is_some_and(|remaining| remaining < TASKS));
	}

	fn exhausted_for(delay: Duration) -> RateLimitTracker {
		let tracker = RateLimitTracker::new();
		let now = OffsetDateTime::now_utc();

		tracker.update(RateLimitSnapshot {
			limit: Some(250),
			remaining: Some(0),
			reset_at: Some(now + delay),
			observed_at: now,
		});

		tracker
	}

	#[tokio::test(start_paused = true)]
	async fn wait_blocks_until_reset() {
		let tracker = exhausted_for(Duration::seconds(2));
		let started = Instant::now();

		tracker
			.wait_for_rate_limit(&CallContext::new())
			.await
			.expect("Wait should complete once the window resets.");

		let elapsed = started.elapsed();

		assert!(elapsed >= StdDuration::from_millis(1900), "Waited only {elapsed:?}.");
		assert!(elapsed <= StdDuration::from_millis(2100), "Waited {elapsed:?}.");
	}

	#[tokio::test(start_paused = true)]
	async fn wait_returns_immediately_with_budget_or_cancellation() {
		let started = Instant::now();
		let tracker = RateLimitTracker::new();

		tracker.record(200, &headers(&[("x-ratelimit-remaining", "5")]));
		tracker.wait_for_rate_limit(&CallContext::new()).await.expect("Budget left means no wait.");

		let ctx = CallContext::new();

		ctx.cancel();

		let err = exhausted_for(Duration::seconds(2))
			.wait_for_rate_limit(&ctx)
			.await
			.expect_err("Canceled context should abort the wait.");

		assert!(matches!(err, Error::Canceled(Cancellation::Canceled)));
		assert!(started.elapsed() < StdDuration::from_millis(10));
	}
}
