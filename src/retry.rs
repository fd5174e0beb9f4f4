//! Classified retries with capped exponential backoff.
//!
//! [`run_with_retry`] performs up to `1 + max_retries` physical attempts. Only failures for
//! which [`Error::is_retryable`] holds (HTTP 429, any 5xx, connection-level transport errors)
//! are replayed; everything else, including success, ends the loop. The backoff sleep goes
//! through the caller's [`CallContext`], so cancellation aborts the loop with the context error
//! instead of the last API error.

// std
use std::time::Duration as StdDuration;
// self
use crate::{_prelude::*, context::CallContext, obs};

/// Retry budget and backoff curve.
///
/// The delay before retry `n` (0-indexed after the first failure) is
/// `min(initial_backoff * multiplier^n, max_backoff)`. Multipliers below `1.0` (or NaN) are
/// treated as `1.0`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RetryPolicy {
	/// Retries allowed after the first attempt.
	pub max_retries: u32,
	/// Delay before the first retry.
	pub initial_backoff: StdDuration,
	/// Upper bound for any single delay.
	pub max_backoff: StdDuration,
	/// Growth factor applied per retry.
	pub multiplier: f64,
}
impl RetryPolicy {
	/// Policy that never retries; behaves like having no policy at all.
	pub const fn none() -> Self {
		Self {
			max_retries: 0,
			initial_backoff: StdDuration::ZERO,
			max_backoff: StdDuration::ZERO,
			multiplier: 1.0,
		}
	}

	/// Overrides the retry budget.
	pub fn with_max_retries(mut self, max_retries: u32) -> Self {
		self.max_retries = max_retries;

		self
	}

	/// Overrides the initial and maximum delays.
	pub fn with_backoff(mut self, initial: StdDuration, max: StdDuration) -> Self {
		self.initial_backoff = initial;
		self.max_backoff = max;

		self
	}

	/// Overrides the growth factor.
	pub fn with_multiplier(mut self, multiplier: f64) -> Self {
		self.multiplier = multiplier;

		self
	}

	/// Delay before retry `retry` (0-indexed).
	pub fn delay(&self, retry: u32) -> StdDuration {
		let multiplier = self.multiplier.max(1.0);
		let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
		let secs = self.initial_backoff.as_secs_f64() * multiplier.powi(exponent);

		if !secs.is_finite() || secs >= self.max_backoff.as_secs_f64() {
			self.max_backoff
		} else {
			StdDuration::from_secs_f64(secs.max(0.0))
		}
	}
}
impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			max_retries: 3,
			initial_backoff: StdDuration::from_millis(500),
			max_backoff: StdDuration::from_secs(30),
			multiplier: 2.0,
		}
	}
}

/// Runs `attempt` until it succeeds, fails fatally, or the retry budget is spent.
///
/// `attempt` receives the 0-indexed attempt number. Without a policy exactly one attempt is
/// made. Every attempt and every backoff sleep observes `ctx`.
pub async fn run_with_retry<T, F, Fut>(
	ctx: &CallContext,
	policy: Option<&RetryPolicy>,
	mut attempt: F,
) -> Result<T>
where
	F: FnMut(u32) -> Fut,
	Fut: Future<Output = Result<T>>,
{
	let Some(policy) = policy else {
		return ctx.run(attempt(0)).await?;
	};
	let mut retry = 0;

	loop {
		match ctx.run(attempt(retry)).await? {
			Ok(value) => return Ok(value),
			Err(e) if e.is_retryable() && retry < policy.max_retries => {
				let delay = policy.delay(retry);

				obs::event!(
					debug,
					retry,
					delay_ms = delay.as_millis() as u64,
					status = e.status(),
					"Retrying after transient failure."
				);

				ctx.sleep(delay).await?;

				retry += 1;
			},
			Err(e) => {
				if e.is_retryable() {
					obs::event!(warn, attempts = retry + 1, error = %e, "Retry budget exhausted.");
				}

				return Err(e);
			},
		}
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::sync::atomic::{AtomicU32, Ordering};
	// crates.io
	use tokio::time::Instant;
	// self
	use super::*;
	use crate::error::{ApiError, Cancellation, ErrorKind, TransportError};

	fn api(status: u16) -> Error {
		ApiError::from_response(status, b"").into()
	}

	#[test]
	fn delay_grows_and_caps() {
		let policy = RetryPolicy::default();

		assert_eq!(policy.delay(0), StdDuration::from_millis(500));
		assert_eq!(policy.delay(1), StdDuration::from_secs(1));
		assert_eq!(policy.delay(3), StdDuration::from_secs(4));
		assert_eq!(policy.delay(6), StdDuration::from_secs(30));
		assert_eq!(policy.delay(u32::MAX), StdDuration::from_secs(30));
	}

	#[test]
	fn delay_never_exceeds_max_or_shrinks_below_initial() {
		let policy = RetryPolicy::default()
			.with_backoff(StdDuration::from_millis(100), StdDuration::from_millis(750))
			.with_multiplier(0.5);

		for retry in 0..10 {
			let delay = policy.delay(retry);

			assert!(delay >= StdDuration::from_millis(100));
			assert!(delay <= StdDuration::from_millis(750));
		}

		let nan = RetryPolicy::default().with_multiplier(f64::NAN);

		assert_eq!(nan.delay(5), nan.initial_backoff);
	}

	#[tokio::test(start_paused = true)]
	async fn rate_limited_attempts_retry_until_success() {
		for max_retries in 0..4_u32 {
			let calls = AtomicU32::new(0);
			let policy = RetryPolicy::default().with_max_retries(max_retries);
			let value = run_with_retry(&CallContext::new(), Some(&policy), |_| {
				let n = calls.fetch_add(1, Ordering::SeqCst);

				async move { if n < max_retries { Err(api(429)) } else { Ok(n) } }
			})
			.await
			.expect("Final attempt should succeed.");

			assert_eq!(value, max_retries);
			assert_eq!(calls.load(Ordering::SeqCst), max_retries + 1);
		}
	}

	#[tokio::test(start_paused = true)]
	async fn fatal_statuses_stop_after_one_attempt() {
		for status in [400, 401, 403, 404] {
			let calls = AtomicU32::new(0);
			let policy = RetryPolicy::default().with_max_retries(5);
			let err = run_with_retry::<(), _, _>(&CallContext::new(), Some(&policy), |_| {
				calls.fetch_add(1, Ordering::SeqCst);

				async move { Err(api(status)) }
			})
			.await
			.expect_err("Fatal status should fail.");

			assert_eq!(calls.load(Ordering::SeqCst), 1);
			assert_eq!(err.kind(), ErrorKind::FatalApi);
			assert_eq!(err.status(), Some(status));
		}
	}

	#[tokio::test(start_paused = true)]
	async fn exhaustion_returns_last_error_unchanged() {
		let calls = AtomicU32::new(0);
		let policy = RetryPolicy::default().with_max_retries(2);
		let err = run_with_retry::<(), _, _>(&CallContext::new(), Some(&policy), |_| {
			let n = calls.fetch_add(1, Ordering::SeqCst);

			async move { if n < 2 { Err(api(503)) } else { Err(api(429)) } }
		})
		.await
		.expect_err("Exhausted retries should fail.");

		assert_eq!(calls.load(Ordering::SeqCst), 3);
		assert!(err.is_rate_limited());
		assert_eq!(err.kind(), ErrorKind::RetryExhausted);
	}

	#[tokio::test(start_paused = true)]
	async fn transport_errors_are_retryable() {
		let calls = AtomicU32::new(0);
		let policy = RetryPolicy::default().with_max_retries(1);
		let value = run_with_retry(&CallContext::new(), Some(&policy), |_| {
			let n = calls.fetch_add(1, Ordering::SeqCst);

			async move {
				if n == 0 {
					Err(Error::from(TransportError::Io(std::io::Error::other("reset"))))
				} else {
					Ok("ok")
				}
			}
		})
		.await
		.expect("Second attempt should succeed.");

		assert_eq!(value, "ok");
	}

	#[tokio::test]
	async fn no_policy_means_single_attempt() {
		let calls = AtomicU32::new(0);
		let err = run_with_retry::<(), _, _>(&CallContext::new(), None, |_| {
			calls.fetch_add(1, Ordering::SeqCst);

			async move { Err(api(500)) }
		})
		.await
		.expect_err("Single attempt should fail.");

		assert_eq!(calls.load(Ordering::SeqCst), 1);
		assert_eq!(err.status(), Some(500));
	}

	#[tokio::test]
	async fn canceled_context_skips_attempts() {
		let ctx = CallContext::new();
		let calls = AtomicU32::new(0);

		ctx.cancel();

		let err = run_with_retry::<(), _, _>(&ctx, Some(&RetryPolicy::default()), |_| {
			calls.fetch_add(1, Ordering::SeqCst);

			async move { Err(api(429)) }
		})
		.await
		.expect_err("Canceled context should fail.");

		assert!(err.is_canceled());
		assert!(calls.load(Ordering::SeqCst) <= 1);
	}

	#[tokio::test(start_paused = true)]
	async fn cancellation_during_backoff_returns_context_error() {
		let ctx = CallContext::new().with_timeout(StdDuration::from_secs(1));
		let policy = RetryPolicy::default()
			.with_max_retries(10)
			.with_backoff(StdDuration::from_secs(60), StdDuration::from_secs(60));
		let started = Instant::now();
		let err = run_with_retry::<(), _, _>(&ctx, Some(&policy), |_| async { Err(api(503)) })
			.await
			.expect_err("Deadline should interrupt the backoff.");

		assert!(matches!(err, Error::Canceled(Cancellation::DeadlineExceeded)));
		assert!(started.elapsed() < StdDuration::from_secs(2));
	}
}
