//! Authorization code grant helpers for [`TokenManager`].

// crates.io
use rand::{Rng, distr::Alphanumeric};
// self
use crate::{
	_prelude::*,
	auth::TokenState,
	context::CallContext,
	error::ConfigError,
	flows::TokenManager,
	obs::{self, PipelineOp},
};

const STATE_LEN: usize = 32;

/// Authorization URL paired with the `state` value it carries.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthorizationRequest {
	/// Fully-formed URL to send the end user to.
	pub url: Url,
	/// Opaque value that must round-trip through the redirect.
	pub state: String,
}
impl AuthorizationRequest {
	/// Checks the `state` returned on the redirect against the one issued.
	pub fn validate_state(&self, returned_state: &str) -> Result<()> {
		if returned_state == self.state { Ok(()) } else { Err(Error::StateMismatch) }
	}
}

impl TokenManager {
	/// Builds the URL that starts the authorization code grant.
	///
	/// The query carries `response_type=code`, the client id, the redirect URI, the
	/// space-delimited configured scopes, and `state` when provided. Fails with
	/// [`ConfigError::MissingRedirectUri`] when no redirect URI is configured.
	pub fn authorization_url(&self, state: Option<&str>) -> Result<Url> {
		let config = self.config();
		let redirect_uri = config.redirect_uri.as_ref().ok_or(ConfigError::MissingRedirectUri)?;
		let mut url = config.endpoints.authorization.clone();

		{
			let mut pairs = url.query_pairs_mut();

			pairs.append_pair("response_type", "code");
			pairs.append_pair("client_id", &config.client_id);
			pairs.append_pair("redirect_uri", redirect_uri.as_str());

			if !config.scopes.is_empty() {
				pairs.append_pair("scope", &config.scopes.normalized());
			}
			if let Some(state) = state {
				pairs.append_pair("state", state);
			}
		}

		Ok(url)
	}

	/// Builds an authorization URL with a freshly generated `state` unless one is supplied.
	pub fn authorization_request(&self, state: Option<&str>) -> Result<AuthorizationRequest> {
		let state = state.map(str::to_owned).unwrap_or_else(|| random_state(STATE_LEN));
		let url = self.authorization_url(Some(&state))?;

		Ok(AuthorizationRequest { url, state })
	}

	/// Exchanges the authorization code from the redirect and installs the resulting tokens.
	///
	/// A failed exchange leaves the held state untouched. When persisting the new tokens fails
	/// the error is returned, but the tokens remain installed in memory.
	pub async fn exchange_code(&self, ctx: &CallContext, code: &str) -> Result<TokenState> {
		let state = obs::observe(PipelineOp::CodeExchange, "exchange_code", async {
			ctx.run(self.endpoint.exchange_code(code)).await?
		})
		.await?;

		self.set_tokens(state.clone()).await?;

		Ok(state)
	}
}

fn random_state(len: usize) -> String {
	rand::rng().sample_iter(&Alphanumeric).take(len).map(char::from).collect()
}
