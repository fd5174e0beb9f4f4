//! Typed configuration for the OAuth lifecycle and the request executor.
//!
//! [`OAuthConfig`] is assembled through a validating builder: endpoints must use HTTPS (loopback
//! hosts are exempt so local fixtures work), the client id must be present, and the refresh
//! buffer cannot be negative. [`ClientConfig`] carries executor knobs with production defaults.

// crates.io
use url::Host;
// self
use crate::{
	_prelude::*,
	auth::{DEFAULT_REFRESH_BUFFER, ScopeSet, ScopeValidationError, TokenSecret},
	rate_limit::RateLimitObserver,
	retry::RetryPolicy,
};

/// Authorization endpoint used when none is configured.
pub const DEFAULT_AUTHORIZATION_ENDPOINT: &str =
	"https://auth-global.api.smartthings.com/oauth/authorize";
/// Token endpoint used when none is configured.
pub const DEFAULT_TOKEN_ENDPOINT: &str = "https://auth-global.api.smartthings.com/oauth/token";
/// API base URL used when none is configured.
pub const DEFAULT_API_BASE_URL: &str = "https://api.smartthings.com/v1/";
/// Scopes requested when the caller does not pick any.
pub const DEFAULT_SCOPES: [&str; 3] = ["r:devices:*", "r:locations:*", "x:devices:*"];

/// Errors raised while constructing or validating an [`OAuthConfig`].
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum OAuthConfigError {
	/// Client id was empty.
	#[error("Client id cannot be empty.")]
	MissingClientId,
	/// An endpoint could not be parsed.
	#[error("The {endpoint} endpoint is not a valid URL.")]
	InvalidEndpoint {
		/// Which endpoint failed to parse.
		endpoint: &'static str,
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// Endpoints must use HTTPS unless they point at a loopback host.
	#[error("The {endpoint} endpoint must use HTTPS: {url}.")]
	InsecureEndpoint {
		/// Which endpoint failed validation.
		endpoint: &'static str,
		/// Endpoint URL that failed validation.
		url: String,
	},
	/// Refresh buffer was negative.
	#[error("Refresh buffer cannot be negative.")]
	NegativeRefreshBuffer,
	/// Requested scopes were malformed.
	#[error("Requested scopes are invalid.")]
	InvalidScope(#[from] ScopeValidationError),
}

/// Authorization and token endpoints.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthEndpoints {
	/// Authorization endpoint users are redirected to.
	pub authorization: Url,
	/// Token endpoint used for code exchanges and refreshes.
	pub token: Url,
}

/// Validated OAuth client configuration consumed by the token lifecycle manager.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OAuthConfig {
	/// OAuth client identifier.
	pub client_id: String,
	/// OAuth client secret, sent with HTTP Basic auth.
	pub client_secret: Option<TokenSecret>,
	/// Redirect URI registered for the app.
	pub redirect_uri: Option<Url>,
	/// Scopes requested in the authorization URL.
	pub scopes: ScopeSet,
	/// Endpoint set.
	pub endpoints: OAuthEndpoints,
	/// Margin before expiry at which the access token counts as stale.
	pub refresh_buffer: Duration,
}
impl OAuthConfig {
	/// Creates a new builder for the provided client id.
	pub fn builder(client_id: impl Into<String>) -> OAuthConfigBuilder {
		OAuthConfigBuilder::new(client_id)
	}
}

/// Builder for [`OAuthConfig`] values.
#[derive(Debug)]
pub struct OAuthConfigBuilder {
	client_id: String,
	client_secret: Option<TokenSecret>,
	redirect_uri: Option<Url>,
	scopes: Option<Vec<String>>,
	authorization_endpoint: Option<Url>,
	token_endpoint: Option<Url>,
	refresh_buffer: Duration,
}
impl OAuthConfigBuilder {
	fn new(client_id: impl Into<String>) -> Self {
		Self {
			client_id: client_id.into(),
			client_secret: None,
			redirect_uri: None,
			scopes: None,
			authorization_endpoint: None,
			token_endpoint: None,
			refresh_buffer: DEFAULT_REFRESH_BUFFER,
		}
	}

	/// Sets the client secret.
	pub fn client_secret(mut self, secret: impl Into<String>) -> Self {
		self.client_secret = Some(TokenSecret::new(secret));

		self
	}

	/// Sets the redirect URI.
	pub fn redirect_uri(mut self, url: Url) -> Self {
		self.redirect_uri = Some(url);

		self
	}

	/// Overrides the requested scopes.
	pub fn scopes<I, S>(mut self, scopes: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.scopes = Some(scopes.into_iter().map(Into::into).collect());

		self
	}

	/// Overrides the authorization endpoint.
	pub fn authorization_endpoint(mut self, url: Url) -> Self {
		self.authorization_endpoint = Some(url);

		self
	}

	/// Overrides the token endpoint.
	pub fn token_endpoint(mut self, url: Url) -> Self {
		self.token_endpoint = Some(url);

		self
	}

	/// Overrides the refresh buffer (defaults to five minutes).
	pub fn refresh_buffer(mut self, buffer: Duration) -> Self {
		self.refresh_buffer = buffer;

		self
	}

	/// Consumes the builder and validates the resulting configuration.
	pub fn build(self) -> Result<OAuthConfig, OAuthConfigError> {
		if self.client_id.trim().is_empty() {
			return Err(OAuthConfigError::MissingClientId);
		}
		if self.refresh_buffer.is_negative() {
			return Err(OAuthConfigError::NegativeRefreshBuffer);
		}

		let authorization = endpoint_or_default(
			"authorization",
			self.authorization_endpoint,
			DEFAULT_AUTHORIZATION_ENDPOINT,
		)?;
		let token = endpoint_or_default("token", self.token_endpoint, DEFAULT_TOKEN_ENDPOINT)?;
		let scopes = match self.scopes {
			Some(scopes) if !scopes.is_empty() => ScopeSet::new(scopes)?,
			_ => ScopeSet::new(DEFAULT_SCOPES)?,
		};

		validate_endpoint("authorization", &authorization)?;
		validate_endpoint("token", &token)?;

		Ok(OAuthConfig {
			client_id: self.client_id,
			client_secret: self.client_secret,
			redirect_uri: self.redirect_uri,
			scopes,
			endpoints: OAuthEndpoints { authorization, token },
			refresh_buffer: self.refresh_buffer,
		})
	}
}

/// Request executor settings.
#[derive(Clone)]
pub struct ClientConfig {
	/// Base URL that request paths are joined onto; always ends with `/`.
	pub base_url: Url,
	/// Retry policy; `None` performs exactly one attempt per call.
	pub retry: Option<RetryPolicy>,
	/// Optional callback invoked after every rate-limit snapshot update.
	pub rate_limit_observer: Option<RateLimitObserver>,
	/// `User-Agent` header value.
	pub user_agent: String,
}
impl ClientConfig {
	/// Overrides the base URL, appending a trailing slash when missing.
	pub fn with_base_url(mut self, mut url: Url) -> Self {
		if !url.path().ends_with('/') {
			let path = format!("{}/", url.path());

			url.set_path(&path);
		}

		self.base_url = url;

		self
	}

	/// Overrides the retry policy.
	pub fn with_retry(mut self, retry: Option<RetryPolicy>) -> Self {
		self.retry = retry;

		self
	}

	/// Installs a rate-limit observer.
	pub fn with_rate_limit_observer(mut self, observer: RateLimitObserver) -> Self {
		self.rate_limit_observer = Some(observer);

		self
	}

	/// Overrides the `User-Agent` header.
	pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
		self.user_agent = user_agent.into();

		self
	}
}
impl Default for ClientConfig {
	fn default() -> Self {
		Self {
			base_url: Url::parse(DEFAULT_API_BASE_URL)
				.unwrap_or_else(|_| unreachable!("default API base URL is a valid constant")),
			retry: Some(RetryPolicy::default()),
			rate_limit_observer: None,
			user_agent: concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")).into(),
		}
	}
}
impl Debug for ClientConfig {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ClientConfig")
			.field("base_url", &self.base_url.as_str())
			.field("retry", &self.retry)
			.field("rate_limit_observer", &self.rate_limit_observer.is_some())
			.field("user_agent", &self.user_agent)
			.finish()
	}
}

fn endpoint_or_default(
	endpoint: &'static str,
	configured: Option<Url>,
	default: &str,
) -> Result<Url, OAuthConfigError> {
	match configured {
		Some(url) => Ok(url),
		None => Url::parse(default)
			.map_err(|source| OAuthConfigError::InvalidEndpoint { endpoint, source }),
	}
}

fn validate_endpoint(endpoint: &'static str, url: &Url) -> Result<(), OAuthConfigError> {
	if url.scheme() == "https" || is_loopback(url) {
		Ok(())
	} else {
		Err(OAuthConfigError::InsecureEndpoint { endpoint, url: url.to_string() })
	}
}

fn is_loopback(url: &Url) -> bool {
	match url.host() {
		Some(Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
		Some(Host::Ipv4(ip)) => ip.is_loopback(),
		Some(Host::Ipv6(ip)) => ip.is_loopback(),
		None => false,
	}
}
