//! Token state record, lifecycle predicates, and builder.

// crates.io
use time::serde::rfc3339;
// self
use crate::{
	_prelude::*,
	auth::{ScopeSet, token::secret::TokenSecret},
};

/// Safety margin subtracted from the access-token expiry when deciding validity.
pub const DEFAULT_REFRESH_BUFFER: Duration = Duration::minutes(5);

/// Lifecycle status of a [`TokenState`] at a given instant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenStatus {
	/// Access token is usable for at least the refresh buffer.
	Valid,
	/// Access token is stale but the refresh token can mint a new one.
	NeedsRefresh,
	/// Neither token is usable; a new authorization code exchange is required.
	ReauthenticationRequired,
}

/// Errors produced by [`TokenStateBuilder`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum TokenStateBuilderError {
	/// Issued when no access token value was provided.
	#[error("Access token is required.")]
	MissingAccessToken,
	/// Issued when no expiry (absolute or relative) was configured.
	#[error("Expiry must be supplied via expires_at or expires_in.")]
	MissingExpiry,
}

/// Access/refresh token pair with expiry instants, as issued by the token endpoint.
///
/// A missing `refresh_expires_at` (or one at or before the Unix epoch) means the refresh token
/// never expires.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenState {
	/// Access token secret; callers must avoid logging it.
	pub access_token: TokenSecret,
	/// Refresh token secret, if one was issued.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub refresh_token: Option<TokenSecret>,
	/// Access-token expiry instant.
	#[serde(with = "rfc3339")]
	pub expires_at: OffsetDateTime,
	/// Refresh-token expiry instant; `None` means the refresh token does not expire.
	#[serde(default, with = "rfc3339::option", skip_serializing_if = "Option::is_none")]
	pub refresh_expires_at: Option<OffsetDateTime>,
	/// Token type reported by the endpoint, normally `bearer`.
	pub token_type: String,
	/// Scopes granted with the token.
	#[serde(default)]
	pub scope: ScopeSet,
}
impl TokenState {
	/// Returns a builder for assembling token state.
	pub fn builder() -> TokenStateBuilder {
		TokenStateBuilder::default()
	}

	/// Returns `true` if the access token is non-empty and stays valid past `now + buffer`.
	pub fn is_valid_at(&self, now: OffsetDateTime, buffer: Duration) -> bool {
		!self.access_token.is_blank() && now + buffer < self.expires_at
	}

	/// [`is_valid_at`](Self::is_valid_at) against the current clock.
	pub fn is_valid(&self, buffer: Duration) -> bool {
		self.is_valid_at(OffsetDateTime::now_utc(), buffer)
	}

	/// Returns `true` if the refresh token has expired at `now`.
	pub fn refresh_expired_at(&self, now: OffsetDateTime) -> bool {
		match self.refresh_expires_at {
			Some(instant) if instant > OffsetDateTime::UNIX_EPOCH => now >= instant,
			_ => false,
		}
	}

	/// Returns `true` if a non-empty, unexpired refresh token is available at `now`.
	pub fn can_refresh_at(&self, now: OffsetDateTime) -> bool {
		self.refresh_token.as_ref().is_some_and(|secret| !secret.is_blank())
			&& !self.refresh_expired_at(now)
	}

	/// [`can_refresh_at`](Self::can_refresh_at) against the current clock.
	pub fn can_refresh(&self) -> bool {
		self.can_refresh_at(OffsetDateTime::now_utc())
	}

	/// Returns `true` if the access token is stale and the refresh token can replace it.
	pub fn needs_refresh_at(&self, now: OffsetDateTime, buffer: Duration) -> bool {
		!self.is_valid_at(now, buffer) && self.can_refresh_at(now)
	}

	/// Computes the lifecycle status at `now`.
	pub fn status_at(&self, now: OffsetDateTime, buffer: Duration) -> TokenStatus {
		if self.is_valid_at(now, buffer) {
			TokenStatus::Valid
		} else if self.can_refresh_at(now) {
			TokenStatus::NeedsRefresh
		} else {
			TokenStatus::ReauthenticationRequired
		}
	}

	/// Time left before the access token expires (negative once expired).
	pub fn remaining_at(&self, now: OffsetDateTime) -> Duration {
		self.expires_at - now
	}
}
impl Debug for TokenState {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenState")
			.field("access_token", &"<redacted>")
			.field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
			.field("expires_at", &self.expires_at)
			.field("refresh_expires_at", &self.refresh_expires_at)
			.field("token_type", &self.token_type)
			.field("scope", &self.scope)
			.finish()
	}
}

/// Builder for [`TokenState`].
#[derive(Clone, Debug, Default)]
pub struct TokenStateBuilder {
	access_token: Option<TokenSecret>,
	refresh_token: Option<TokenSecret>,
	issued_at: Option<OffsetDateTime>,
	expires_at: Option<OffsetDateTime>,
	expires_in: Option<Duration>,
	refresh_expires_at: Option<OffsetDateTime>,
	refresh_expires_in: Option<Duration>,
	token_type: Option<String>,
	scope: ScopeSet,
}
impl TokenStateBuilder {
	/// Sets the instant relative expiries are measured from (defaults to now).
	pub fn issued_at(mut self, instant: OffsetDateTime) -> Self {
		self.issued_at = Some(instant);

		self
	}

	/// Sets an absolute access-token expiry; wins over [`expires_in`](Self::expires_in).
	pub fn expires_at(mut self, instant: OffsetDateTime) -> Self {
		self.expires_at = Some(instant);

		self
	}

	/// Sets a relative access-token lifetime.
	pub fn expires_in(mut self, duration: Duration) -> Self {
		self.expires_in = Some(duration);

		self
	}

	/// Sets an absolute refresh-token expiry.
	pub fn refresh_expires_at(mut self, instant: OffsetDateTime) -> Self {
		self.refresh_expires_at = Some(instant);

		self
	}

	/// Sets a relative refresh-token lifetime.
	pub fn refresh_expires_in(mut self, duration: Duration) -> Self {
		self.refresh_expires_in = Some(duration);

		self
	}

	/// Provides the access token value.
	pub fn access_token(mut self, token: impl Into<String>) -> Self {
		self.access_token = Some(TokenSecret::new(token));

		self
	}

	/// Provides the refresh token value.
	pub fn refresh_token(mut self, token: impl Into<String>) -> Self {
		self.refresh_token = Some(TokenSecret::new(token));

		self
	}

	/// Sets the token type (defaults to `bearer`).
	pub fn token_type(mut self, token_type: impl Into<String>) -> Self {
		self.token_type = Some(token_type.into());

		self
	}

	/// Sets the granted scopes.
	pub fn scope(mut self, scope: ScopeSet) -> Self {
		self.scope = scope;

		self
	}

	/// Consumes the builder and produces a [`TokenState`].
	pub fn build(self) -> Result<TokenState, TokenStateBuilderError> {
		let access_token = self.access_token.ok_or(TokenStateBuilderError::MissingAccessToken)?;
		let issued_at = self.issued_at.unwrap_or_else(OffsetDateTime::now_utc);
		let expires_at = match (self.expires_at, self.expires_in) {
			(Some(instant), _) => instant,
			(None, Some(delta)) => issued_at + delta,
			(None, None) => return Err(TokenStateBuilderError::MissingExpiry),
		};
		let refresh_expires_at = self
			.refresh_expires_at
			.or_else(|| self.refresh_expires_in.map(|delta| issued_at + delta));

		Ok(TokenState {
			access_token,
			refresh_token: self.refresh_token,
			expires_at,
			refresh_expires_at,
			token_type: self.token_type.unwrap_or_else(|| "bearer".into()),
			scope: self.scope,
		})
	}
}
