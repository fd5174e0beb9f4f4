//! Check-inside-lock refresh for [`TokenManager`].
//!
//! [`TokenManager::ensure_valid`] takes the token lock before looking at the token and keeps
//! it until the refresh (if any) is finished, so callers that raced to the lock find the
//! refreshed token and return without contacting the endpoint. A failed refresh is returned to
//! every caller that was already waiting on the lock, and an `invalid_grant` rejection drops
//! the in-memory refresh token so later calls fail fast with
//! [`Error::ReauthenticationRequired`]. A refreshed token is persisted on a background task,
//! best effort, so a slow store never holds the lock or the caller.

mod metrics;

pub use metrics::{RefreshCounts, RefreshMetrics};

// std
use std::sync::atomic::Ordering;
// self
use crate::{
	_prelude::*,
	auth::{TokenState, TokenStatus},
	context::CallContext,
	error::TokenEndpointError,
	flows::TokenManager,
	oauth::GRANT_REFRESH_TOKEN,
	obs::{self, PipelineOp},
};

impl TokenManager {
	/// Returns a token that stays valid past the refresh buffer, refreshing it if needed.
	///
	/// Fails with [`Error::Unauthenticated`] when no token is held and with
	/// [`Error::ReauthenticationRequired`] when the refresh token is missing or expired.
	pub async fn ensure_valid(&self, ctx: &CallContext) -> Result<TokenState> {
		self.refresh_metrics.record_attempt();

		let failures_seen = self.failure_epoch.load(Ordering::SeqCst);
		let mut slot = ctx.lock(&self.slot).await?;
		let Some(current) = slot.state.clone() else {
			return Err(Error::Unauthenticated);
		};

		match current.status_at(OffsetDateTime::now_utc(), self.config.refresh_buffer) {
			TokenStatus::Valid => return Ok(current),
			TokenStatus::ReauthenticationRequired => return Err(Error::ReauthenticationRequired),
			TokenStatus::NeedsRefresh => (),
		}

		if self.failure_epoch.load(Ordering::SeqCst) != failures_seen {
			if let Some(failure) = &slot.last_failure {
				return Err(failure.clone().into());
			}
		}

		obs::event!(debug, "Access token is stale; refreshing.");

		self.refresh_metrics.record_network_refresh();

		let outcome = obs::observe(PipelineOp::Refresh, "ensure_valid", async {
			ctx.run(self.endpoint.refresh(&current)).await?
		})
		.await;

		match outcome {
			Ok(next) => {
				self.refresh_metrics.record_success();

				slot.state = Some(next.clone());
				slot.last_failure = None;

				self.persist_in_background(next.clone());

				drop(slot);

				Ok(next)
			},
			Err(e) if e.is_canceled() => Err(e),
			Err(e) => {
				self.refresh_metrics.record_failure();

				let failure = shared_failure(&e);

				if failure.is_invalid_grant() {
					if let Some(state) = slot.state.as_mut() {
						state.refresh_token = None;
						state.refresh_expires_at = None;
					}
				}

				slot.last_failure = Some(failure);

				self.failure_epoch.fetch_add(1, Ordering::SeqCst);

				Err(e)
			},
		}
	}
}

fn shared_failure(error: &Error) -> TokenEndpointError {
	match error.root() {
		Error::TokenEndpoint(inner) => inner.clone(),
		other => TokenEndpointError {
			grant: GRANT_REFRESH_TOKEN,
			status: other.status(),
			oauth_error: None,
			message: other.to_string(),
		},
	}
}
