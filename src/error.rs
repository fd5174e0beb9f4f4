//! Pipeline-wide error taxonomy shared by the token lifecycle, retry engine, and executor.
//!
//! Lower layers wrap failures with [`ResultExt::context`] instead of flattening them, so the
//! classification helpers on [`Error`] (`is_retryable`, `is_rate_limited`, `kind`, ...) keep
//! answering correctly no matter how many operation names were stacked on top.

// self
use crate::{_prelude::*, auth::ScopeValidationError, config::OAuthConfigError};

pub use crate::{
	auth::TokenStateBuilderError, context::Cancellation, store::StoreError,
};

/// Crate-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// No usable access token is held.
	#[error("No access token is available; authenticate first.")]
	Unauthenticated,
	/// Refresh token is missing or expired; a fresh authorization code exchange is needed.
	#[error("Refresh token is missing or expired; re-authentication is required.")]
	ReauthenticationRequired,
	/// The `state` returned by the authorization redirect did not match the one issued.
	#[error("Authorization state mismatch.")]
	StateMismatch,
	/// Non-2xx response from the API.
	#[error(transparent)]
	Api(#[from] ApiError),
	/// Transport failure (DNS, TCP, TLS, timeout).
	#[error(transparent)]
	Transport(#[from] TransportError),
	/// The caller's context ended while the call was suspended.
	#[error(transparent)]
	Canceled(#[from] Cancellation),
	/// Token store failure.
	#[error("Token store operation failed.")]
	Storage(#[from] StoreError),
	/// Local configuration or request-construction problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Token endpoint rejected a code exchange or refresh.
	#[error(transparent)]
	TokenEndpoint(#[from] TokenEndpointError),
	/// A successful response body did not match the expected JSON shape.
	#[error("Response body with status {status} could not be decoded.")]
	Decode {
		/// Path-aware JSON failure.
		#[source]
		source: serde_path_to_error::Error<serde_json::Error>,
		/// HTTP status of the undecodable response.
		status: u16,
	},
	/// Error annotated with the operation that produced it.
	#[error("{operation}: {source}")]
	Context {
		/// Operation label, e.g. `devices.list`.
		operation: String,
		/// Wrapped error.
		#[source]
		source: Box<Error>,
	},
}
impl Error {
	/// Returns the innermost error beneath any [`Error::Context`] layers.
	pub fn root(&self) -> &Error {
		let mut current = self;

		while let Error::Context { source, .. } = current {
			current = source;
		}

		current
	}

	/// Folds the error onto the pipeline taxonomy.
	pub fn kind(&self) -> ErrorKind {
		match self.root() {
			Error::Unauthenticated => ErrorKind::Unauthenticated,
			Error::ReauthenticationRequired => ErrorKind::ReauthenticationRequired,
			Error::StateMismatch => ErrorKind::Unauthenticated,
			Error::Api(e) if e.is_retryable() => ErrorKind::RetryExhausted,
			Error::Api(_) => ErrorKind::FatalApi,
			Error::Transport(e) if e.is_retryable() => ErrorKind::RetryExhausted,
			Error::Transport(_) => ErrorKind::Configuration,
			Error::Canceled(_) => ErrorKind::CanceledOrTimedOut,
			Error::Storage(_) => ErrorKind::PersistenceFailure,
			Error::Config(_) => ErrorKind::Configuration,
			Error::TokenEndpoint(_) => ErrorKind::TokenEndpoint,
			Error::Decode { .. } => ErrorKind::Decode,
			Error::Context { .. } => unreachable!("root() strips context layers"),
		}
	}

	/// Returns `true` when the retry engine treats the failure as transient.
	pub fn is_retryable(&self) -> bool {
		match self.root() {
			Error::Api(e) => e.is_retryable(),
			Error::Transport(e) => e.is_retryable(),
			_ => false,
		}
	}

	/// Returns `true` for HTTP 429 responses.
	pub fn is_rate_limited(&self) -> bool {
		matches!(self.root(), Error::Api(e) if e.is_rate_limited())
	}

	/// Returns `true` when the caller's context ended the call.
	pub fn is_canceled(&self) -> bool {
		matches!(self.root(), Error::Canceled(_))
	}

	/// HTTP status associated with the failure, when one was observed.
	pub fn status(&self) -> Option<u16> {
		match self.root() {
			Error::Api(e) => Some(e.status),
			Error::TokenEndpoint(e) => e.status,
			Error::Decode { status, .. } => Some(*status),
			_ => None,
		}
	}

	/// Returns the structured API error, if this is one.
	pub fn as_api_error(&self) -> Option<&ApiError> {
		match self.root() {
			Error::Api(e) => Some(e),
			_ => None,
		}
	}
}

/// Coarse classification of [`Error`] values.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
	/// No usable token.
	Unauthenticated,
	/// Refresh token dead; terminal until a new code exchange.
	ReauthenticationRequired,
	/// A transient failure (429, 5xx, connection) survived the whole retry budget.
	RetryExhausted,
	/// 4xx other than 429.
	FatalApi,
	/// The caller's context was canceled or its deadline elapsed.
	CanceledOrTimedOut,
	/// Token store I/O failed.
	PersistenceFailure,
	/// Token endpoint rejected an exchange or refresh.
	TokenEndpoint,
	/// Local configuration or request construction failed.
	Configuration,
	/// Successful response could not be decoded.
	Decode,
}

/// Adds operation context to fallible results without erasing the original error.
pub trait ResultExt<T> {
	/// Wraps the error in [`Error::Context`] labeled with `operation`.
	fn context(self, operation: impl Into<String>) -> Result<T>;
}
impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
	E: Into<Error>,
{
	fn context(self, operation: impl Into<String>) -> Result<T> {
		self.map_err(|e| Error::Context { operation: operation.into(), source: Box::new(e.into()) })
	}
}

/// Structured failure decoded from a non-2xx API response.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
#[error("API request failed with status {status}: {message}.")]
pub struct ApiError {
	/// HTTP status code.
	pub status: u16,
	/// Machine-readable error code, when the body carried one.
	pub code: Option<String>,
	/// Human-readable message (raw body text when the body was not structured).
	pub message: String,
	/// Correlation id returned by the API.
	pub request_id: Option<String>,
}
impl ApiError {
	/// Builds an error from a response status and body.
	///
	/// Bodies shaped as `{"requestId": .., "error": {"code": .., "message": ..}}` populate the
	/// structured fields; anything else becomes the message verbatim.
	pub fn from_response(status: u16, body: &[u8]) -> Self {
		#[derive(Deserialize)]
		#[serde(rename_all = "camelCase")]
		struct Envelope {
			request_id: Option<String>,
			error: Option<Detail>,
		}
		#[derive(Deserialize)]
		struct Detail {
			code: Option<String>,
			message: Option<String>,
		}

		if let Ok(Envelope { request_id, error: Some(detail) }) =
			serde_json::from_slice::<Envelope>(body)
		{
			let message = detail
				.message
				.or_else(|| detail.code.clone())
				.unwrap_or_else(|| format!("HTTP {status}"));

			return Self { status, code: detail.code, message, request_id };
		}

		let text = String::from_utf8_lossy(body).trim().to_owned();
		let message = if text.is_empty() { format!("HTTP {status}") } else { text };

		Self { status, code: None, message, request_id: None }
	}

	/// `true` for 429 and any 5xx.
	pub fn is_retryable(&self) -> bool {
		self.is_rate_limited() || (500..=599).contains(&self.status)
	}

	/// `true` for 429.
	pub fn is_rate_limited(&self) -> bool {
		self.status == 429
	}

	/// `true` for client errors other than 429.
	pub fn is_fatal(&self) -> bool {
		(400..=499).contains(&self.status) && !self.is_rate_limited()
	}
}

/// Configuration and request-construction failures.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// HTTP request construction failed.
	#[error(transparent)]
	HttpRequest(#[from] oauth2::http::Error),
	/// OAuth configuration failed validation.
	#[error(transparent)]
	OAuth(#[from] OAuthConfigError),
	/// Request path could not be joined onto the base URL.
	#[error("Request path `{path}` is not a valid URL.")]
	InvalidPath {
		/// Offending path.
		path: String,
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// Request path resolved to a host other than the configured API origin.
	#[error("Request URL `{url}` leaves the API origin `{origin}`.")]
	ForeignOrigin {
		/// Resolved URL that was refused.
		url: String,
		/// Origin of the configured base URL.
		origin: String,
	},
	/// An authorization URL was requested without a configured redirect URI.
	#[error("A redirect URI must be configured to build authorization URLs.")]
	MissingRedirectUri,
	/// Request body could not be serialized.
	#[error("Request body could not be serialized.")]
	SerializeBody(#[source] serde_json::Error),
	/// Token endpoint response omitted both `expires_in` and `expires_at`.
	#[error("Token endpoint response is missing expires_in.")]
	MissingExpiresIn,
	/// Token endpoint returned an excessively large `expires_in`.
	#[error("The expires_in value exceeds the supported range.")]
	ExpiresInOutOfRange,
	/// Token endpoint returned a non-positive lifetime.
	#[error("The expires_in value must be positive.")]
	NonPositiveExpiresIn,
	/// Token endpoint returned an unparsable `expires_at`.
	#[error("The expires_at value `{value}` is not RFC 3339.")]
	InvalidExpiresAt {
		/// Raw value.
		value: String,
	},
	/// Granted scopes could not be normalized.
	#[error("Granted scopes are invalid.")]
	InvalidScope(#[from] ScopeValidationError),
	/// Token state builder validation failed.
	#[error("Unable to build token state.")]
	TokenBuild(#[from] TokenStateBuilderError),
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}

/// Token endpoint rejection surfaced with the HTTP status visible to the caller.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
#[error("Token endpoint rejected the {grant} grant: {message}.")]
pub struct TokenEndpointError {
	/// Grant label (`authorization_code` or `refresh_token`).
	pub grant: &'static str,
	/// HTTP status code, when a response was received.
	pub status: Option<u16>,
	/// OAuth `error` field, when the body was structured.
	pub oauth_error: Option<String>,
	/// `error_description` or the raw body text.
	pub message: String,
}
impl TokenEndpointError {
	/// Returns `true` when the endpoint reported `invalid_grant`.
	pub fn is_invalid_grant(&self) -> bool {
		self.oauth_error.as_deref().is_some_and(|code| code.eq_ignore_ascii_case("invalid_grant"))
	}
}

/// Transport-level failures (network, IO).
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while sending the request.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// No response arrived before the transport's timeout.
	#[error("Request timed out before a response was received.")]
	Timeout {
		/// Transport-specific timeout error.
		#[source]
		source: BoxError,
	},
	/// Underlying IO failure surfaced during transport.
	#[error("I/O error occurred during transport.")]
	Io(#[from] std::io::Error),
	/// The transport refused to build the request.
	#[error("Request could not be built by the transport.")]
	InvalidRequest {
		/// Transport-specific builder error.
		#[source]
		source: BoxError,
	},
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Network { source: Box::new(src) }
	}

	/// Wraps a transport-specific timeout.
	pub fn timeout(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Timeout { source: Box::new(src) }
	}

	/// Wraps a transport-specific request builder failure.
	pub fn invalid_request(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::InvalidRequest { source: Box::new(src) }
	}

	/// Connection-level failures are retryable; malformed requests are not.
	pub fn is_retryable(&self) -> bool {
		!matches!(self, Self::InvalidRequest { .. })
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for TransportError {
	fn from(e: ReqwestError) -> Self {
		if e.is_builder() {
			Self::invalid_request(e)
		} else if e.is_timeout() {
			Self::timeout(e)
		} else {
			Self::network(e)
		}
	}
}
