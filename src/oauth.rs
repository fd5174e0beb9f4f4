//! Token endpoint facade over the `oauth2` crate.
//!
//! The facade owns a configured `oauth2` client (HTTP Basic client authentication, JSON
//! responses) and routes every request through the crate's [`HttpTransport`]. Responses are
//! turned into [`TokenState`] values and failures into [`TokenEndpointError`] with the HTTP
//! status attached, whether or not the endpoint answered with a structured OAuth error.

pub use oauth2;

// crates.io
use oauth2::{
	AuthUrl, AuthorizationCode, Client as OAuth2Client, ClientId, ClientSecret, EndpointNotSet,
	EndpointSet, ExtraTokenFields, RedirectUrl, RefreshToken, RequestTokenError,
	StandardRevocableToken, StandardTokenResponse, TokenResponse, TokenUrl,
	basic::{
		BasicErrorResponse, BasicRevocationErrorResponse, BasicTokenIntrospectionResponse,
		BasicTokenType,
	},
};
use time::format_description::well_known::Rfc3339;
// self
use crate::{
	_prelude::*,
	auth::{ScopeSet, TokenState},
	config::OAuthConfig,
	error::{ConfigError, TokenEndpointError, TransportError},
	http::{HttpTransport, ResponseMetadata, ResponseMetadataSlot, TokenEndpointHandle},
};

/// Grant label used for authorization code exchanges.
pub const GRANT_AUTHORIZATION_CODE: &str = "authorization_code";
/// Grant label used for refresh token exchanges.
pub const GRANT_REFRESH_TOKEN: &str = "refresh_token";

/// Token response fields beyond the RFC 6749 core set.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TokenExtraFields {
	/// Absolute access-token expiry (RFC 3339); wins over `expires_in` when present.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub expires_at: Option<String>,
	/// Refresh-token lifetime in seconds, when the endpoint reports one.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub refresh_token_expires_in: Option<u64>,
}
impl ExtraTokenFields for TokenExtraFields {}

/// Token endpoint success body.
pub type TokenEndpointResponse = StandardTokenResponse<TokenExtraFields, BasicTokenType>;

type ConfiguredClient = OAuth2Client<
	BasicErrorResponse,
	TokenEndpointResponse,
	BasicTokenIntrospectionResponse,
	StandardRevocableToken,
	BasicRevocationErrorResponse,
	EndpointSet,
	EndpointNotSet,
	EndpointNotSet,
	EndpointNotSet,
	EndpointSet,
>;
type TokenRequestError = RequestTokenError<TransportError, BasicErrorResponse>;

/// Performs code exchanges and refreshes against the configured token endpoint.
#[derive(Clone)]
pub struct TokenEndpoint {
	oauth_client: ConfiguredClient,
	transport: Arc<dyn HttpTransport>,
	scopes: ScopeSet,
}
impl TokenEndpoint {
	/// Builds a facade for `config` that sends requests through `transport`.
	pub fn new(config: &OAuthConfig, transport: Arc<dyn HttpTransport>) -> Self {
		let mut oauth_client = OAuth2Client::new(ClientId::new(config.client_id.clone()))
			.set_auth_uri(AuthUrl::from_url(config.endpoints.authorization.clone()))
			.set_token_uri(TokenUrl::from_url(config.endpoints.token.clone()));

		if let Some(secret) = &config.client_secret {
			oauth_client = oauth_client.set_client_secret(ClientSecret::new(secret.expose().into()));
		}
		if let Some(redirect) = &config.redirect_uri {
			oauth_client = oauth_client.set_redirect_uri(RedirectUrl::from_url(redirect.clone()));
		}

		Self { oauth_client, transport, scopes: config.scopes.clone() }
	}

	/// Exchanges an authorization code for a fresh [`TokenState`].
	pub async fn exchange_code(&self, code: &str) -> Result<TokenState> {
		let meta = ResponseMetadataSlot::default();
		let handle = TokenEndpointHandle::new(self.transport.clone(), meta.clone());
		let response = self
			.oauth_client
			.exchange_code(AuthorizationCode::new(code.to_owned()))
			.request_async(&handle)
			.await
			.map_err(|e| map_request_error(GRANT_AUTHORIZATION_CODE, meta.take(), e))?;

		token_state_from_response(&response, &self.scopes, None)
	}

	/// Trades the refresh token held by `current` for a new [`TokenState`].
	///
	/// When the endpoint does not rotate the refresh token, the previous one (and its expiry)
	/// carries over.
	pub async fn refresh(&self, current: &TokenState) -> Result<TokenState> {
		let Some(secret) = current.refresh_token.as_ref().filter(|secret| !secret.is_blank())
		else {
			return Err(Error::ReauthenticationRequired);
		};
		let meta = ResponseMetadataSlot::default();
		let handle = TokenEndpointHandle::new(self.transport.clone(), meta.clone());
		let refresh_token = RefreshToken::new(secret.expose().to_owned());
		let response = self
			.oauth_client
			.exchange_refresh_token(&refresh_token)
			.request_async(&handle)
			.await
			.map_err(|e| map_request_error(GRANT_REFRESH_TOKEN, meta.take(), e))?;
		let fallback_scope = if current.scope.is_empty() { &self.scopes } else { &current.scope };

		token_state_from_response(&response, fallback_scope, Some(current))
	}
}
impl Debug for TokenEndpoint {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenEndpoint")
			.field("token_url", &self.oauth_client.token_uri().as_str())
			.field("scopes", &self.scopes)
			.finish()
	}
}

fn token_state_from_response(
	response: &TokenEndpointResponse,
	fallback_scope: &ScopeSet,
	previous: Option<&TokenState>,
) -> Result<TokenState> {
	let issued_at = OffsetDateTime::now_utc();
	let extra = response.extra_fields();
	let mut builder = TokenState::builder()
		.issued_at(issued_at)
		.access_token(response.access_token().secret().to_owned())
		.token_type(token_type_label(response.token_type()));

	builder = match &extra.expires_at {
		Some(raw) => builder.expires_at(
			OffsetDateTime::parse(raw, &Rfc3339)
				.map_err(|_| ConfigError::InvalidExpiresAt { value: raw.clone() })?,
		),
		None => {
			let expires_in = response.expires_in().ok_or(ConfigError::MissingExpiresIn)?.as_secs();
			let expires_in =
				i64::try_from(expires_in).map_err(|_| ConfigError::ExpiresInOutOfRange)?;

			if expires_in <= 0 {
				return Err(ConfigError::NonPositiveExpiresIn.into());
			}

			builder.expires_in(Duration::seconds(expires_in))
		},
	};

	let scope = match response.scopes() {
		Some(scopes) =>
			ScopeSet::new(scopes.iter().map(|scope| scope.as_str())).map_err(ConfigError::from)?,
		None => fallback_scope.clone(),
	};

	builder = builder.scope(scope);

	match response.refresh_token() {
		Some(refresh) => {
			builder = builder.refresh_token(refresh.secret().to_owned());

			if let Some(lifetime) = extra.refresh_token_expires_in {
				let lifetime =
					i64::try_from(lifetime).map_err(|_| ConfigError::ExpiresInOutOfRange)?;

				builder = builder.refresh_expires_in(Duration::seconds(lifetime));
			}
		},
		None =>
			if let Some(previous) = previous {
				if let Some(secret) = &previous.refresh_token {
					builder = builder.refresh_token(secret.expose().to_owned());
				}
				if let Some(instant) = previous.refresh_expires_at {
					builder = builder.refresh_expires_at(instant);
				}
			},
	}

	builder.build().map_err(|e| ConfigError::from(e).into())
}

fn token_type_label(token_type: &BasicTokenType) -> String {
	match token_type {
		BasicTokenType::Bearer => "bearer".into(),
		BasicTokenType::Mac => "mac".into(),
		BasicTokenType::Extension(other) => other.to_ascii_lowercase(),
		#[allow(unreachable_patterns)]
		_ => "bearer".into(),
	}
}

fn map_request_error(
	grant: &'static str,
	meta: Option<ResponseMetadata>,
	err: TokenRequestError,
) -> Error {
	let status = meta.and_then(|value| value.status);

	match err {
		RequestTokenError::ServerResponse(response) => {
			let code = response.error().as_ref().to_owned();
			let message = response.error_description().cloned().unwrap_or_else(|| code.clone());

			TokenEndpointError { grant, status, oauth_error: Some(code), message }.into()
		},
		RequestTokenError::Request(error) => error.into(),
		RequestTokenError::Parse(source, body) => match status {
			Some(code) if (200..300).contains(&code) => Error::Decode { source, status: code },
			_ => TokenEndpointError { grant, status, oauth_error: None, message: body_text(&body) }
				.into(),
		},
		RequestTokenError::Other(message) =>
			TokenEndpointError { grant, status, oauth_error: None, message }.into(),
	}
}

fn body_text(body: &[u8]) -> String {
	let text = String::from_utf8_lossy(body);
	let trimmed = text.trim();

	if trimmed.is_empty() { "empty response body".into() } else { trimmed.to_owned() }
}
