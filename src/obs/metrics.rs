// self
use crate::obs::{Outcome, PipelineOp};

/// Records an operation outcome via the global metrics recorder (when enabled).
pub fn record_outcome(op: PipelineOp, outcome: Outcome) {
	#[cfg(feature = "metrics")]
	{
		metrics::counter!(
			"smartthings_pipeline_total",
			"op" => op.as_str(),
			"outcome" => outcome.as_str()
		)
		.increment(1);
	}

	#[cfg(not(feature = "metrics"))]
	{
		let _ = (op, outcome);
	}
}

/// Counts one physical HTTP attempt, labeled by status class (`2xx`, `4xx`, `error`, ...).
pub fn record_http_attempt(status: Option<u16>) {
	let class = status_class(status);

	#[cfg(feature = "metrics")]
	{
		metrics::counter!("smartthings_http_attempts_total", "status_class" => class).increment(1);
	}

	#[cfg(not(feature = "metrics"))]
	{
		let _ = class;
	}
}

/// Publishes the latest remaining-request budget.
pub fn record_rate_limit_remaining(remaining: u64) {
	#[cfg(feature = "metrics")]
	{
		metrics::gauge!("smartthings_rate_limit_remaining").set(remaining as f64);
	}

	#[cfg(not(feature = "metrics"))]
	{
		let _ = remaining;
	}
}

fn status_class(status: Option<u16>) -> &'static str {
	match status {
		Some(100..=199) => "1xx",
		Some(200..=299) => "2xx",
		Some(300..=399) => "3xx",
		Some(400..=499) => "4xx",
		Some(_) => "5xx",
		None => "error",
	}
}
