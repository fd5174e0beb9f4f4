//! Caller-supplied cancellation and deadline signals.
//!
//! Every suspension point in the pipeline (waiting for the token lock, the network call, retry
//! backoff, and rate-limit waits) goes through [`CallContext`] so a canceled or expired call
//! returns promptly with [`Cancellation`] instead of finishing the blocking operation.

// std
use std::time::Duration as StdDuration;
// crates.io
use async_lock::MutexGuard as AsyncMutexGuard;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
// self
use crate::_prelude::*;

/// Reason a call stopped before completing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, ThisError)]
pub enum Cancellation {
	/// The cancellation token fired.
	#[error("Call was canceled.")]
	Canceled,
	/// The deadline elapsed.
	#[error("Call deadline elapsed.")]
	DeadlineExceeded,
}

/// Cancellation token plus optional deadline threaded through one logical call.
///
/// Cloning is cheap and clones share the same token, so canceling any clone cancels them all.
#[derive(Clone, Debug, Default)]
pub struct CallContext {
	token: CancellationToken,
	deadline: Option<Instant>,
}
impl CallContext {
	/// Creates a context that never cancels on its own.
	pub fn new() -> Self {
		Self::default()
	}

	/// Creates a context driven by an existing cancellation token.
	pub fn with_token(token: CancellationToken) -> Self {
		Self { token, deadline: None }
	}

	/// Sets the deadline to `timeout` from now, keeping an earlier deadline if one exists.
	pub fn with_timeout(self, timeout: StdDuration) -> Self {
		self.with_deadline(Instant::now() + timeout)
	}

	/// Sets an absolute deadline, keeping an earlier deadline if one exists.
	pub fn with_deadline(mut self, deadline: Instant) -> Self {
		self.deadline = Some(match self.deadline {
			Some(current) if current < deadline => current,
			_ => deadline,
		});

		self
	}

	/// Derives a context whose token is canceled with the parent but can also be canceled on
	/// its own.
	pub fn child(&self) -> Self {
		Self { token: self.token.child_token(), deadline: self.deadline }
	}

	/// Cancels this context (and every clone and child).
	pub fn cancel(&self) {
		self.token.cancel();
	}

	/// Underlying cancellation token.
	pub fn token(&self) -> &CancellationToken {
		&self.token
	}

	/// Configured deadline, if any.
	pub fn deadline(&self) -> Option<Instant> {
		self.deadline
	}

	/// Returns the cancellation reason if the context already ended.
	pub fn check(&self) -> Result<(), Cancellation> {
		if self.token.is_cancelled() {
			return Err(Cancellation::Canceled);
		}
		if self.deadline.is_some_and(|deadline| deadline <= Instant::now()) {
			return Err(Cancellation::DeadlineExceeded);
		}

		Ok(())
	}

	/// Drives `fut` to completion unless the context ends first.
	///
	/// When the context ends, `fut` is dropped without being polled again.
	pub async fn run<F>(&self, fut: F) -> Result<F::Output, Cancellation>
	where
		F: Future,
	{
		self.check()?;

		let deadline = async {
			match self.deadline {
				Some(deadline) => time::sleep_until(deadline).await,
				None => std::future::pending().await,
			}
		};

		tokio::select! {
			biased;
			_ = self.token.cancelled() => Err(Cancellation::Canceled),
			_ = deadline => Err(Cancellation::DeadlineExceeded),
			output = fut => Ok(output),
		}
	}

	/// Sleeps for `duration` unless the context ends first.
	pub async fn sleep(&self, duration: StdDuration) -> Result<(), Cancellation> {
		self.run(time::sleep(duration)).await
	}

	/// Acquires `mutex` unless the context ends first.
	///
	/// A canceled waiter leaves the lock queue immediately, so it never delays other callers.
	pub async fn lock<'a, T>(
		&self,
		mutex: &'a AsyncMutex<T>,
	) -> Result<AsyncMutexGuard<'a, T>, Cancellation> {
		self.run(mutex.lock()).await
	}
}
