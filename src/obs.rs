//! Optional observability helpers for the request pipeline.
//!
//! # Feature Flags
//!
//! - Enable `tracing` (on by default) to emit spans named `smartthings.pipeline` with the `op`
//!   and `stage` fields, plus debug/warn events for retries, refresh decisions, and swallowed
//!   persistence failures.
//! - Enable `metrics` to increment `smartthings_pipeline_total{op,outcome}` and
//!   `smartthings_http_attempts_total{status_class}`, and to publish the
//!   `smartthings_rate_limit_remaining` gauge.

mod metrics;
mod tracing;

pub use metrics::*;
pub use tracing::*;

// self
use crate::_prelude::*;

/// Emits a `tracing` event when the feature is enabled and compiles to nothing otherwise.
macro_rules! event {
	($level:ident, $($arg:tt)+) => {{
		#[cfg(feature = "tracing")]
		{
			::tracing::$level!($($arg)+);
		}
	}};
}
pub(crate) use event;

/// Pipeline operations observed by spans and counters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PipelineOp {
	/// Refresh token exchange.
	Refresh,
	/// Authorization code exchange.
	CodeExchange,
	/// API request through the executor.
	Request,
}
impl PipelineOp {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			PipelineOp::Refresh => "refresh",
			PipelineOp::CodeExchange => "code_exchange",
			PipelineOp::Request => "request",
		}
	}
}
impl Display for PipelineOp {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome labels recorded for each operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Outcome {
	/// Entry to a pipeline operation.
	Attempt,
	/// Successful completion.
	Success,
	/// Failure propagated back to the caller.
	Failure,
}
impl Outcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			Outcome::Attempt => "attempt",
			Outcome::Success => "success",
			Outcome::Failure => "failure",
		}
	}
}
impl Display for Outcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Runs `fut` inside a pipeline span, recording attempt and final outcome.
pub(crate) async fn observe<T, Fut>(op: PipelineOp, stage: &'static str, fut: Fut) -> Result<T>
where
	Fut: Future<Output = Result<T>>,
{
	let span = PipelineSpan::new(op, stage);

	record_outcome(op, Outcome::Attempt);

	let result = span.instrument(fut).await;

	let outcome = if result.is_ok() { Outcome::Success } else { Outcome::Failure };

	span.record_outcome(outcome);
	record_outcome(op, outcome);

	result
}
