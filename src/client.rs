//! Request executor composing the token source, retry engine, and rate-limit tracker.
//!
//! Each logical call obtains a bearer token first and fails without touching the network when
//! that is impossible. The request then goes through [`run_with_retry`], every response that
//! arrives (including ones about to be retried) feeds the [`RateLimitTracker`], and a final
//! non-2xx response becomes an [`ApiError`].

// crates.io
use oauth2::http::{
	Method, Request,
	header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, USER_AGENT},
};
use serde::de::DeserializeOwned;
// self
#[cfg(feature = "reqwest")] use crate::http::ReqwestTransport;
use crate::{
	_prelude::*,
	config::ClientConfig,
	context::CallContext,
	error::{ApiError, ConfigError},
	flows::TokenSource,
	http::{HttpRequest, HttpResponse, HttpTransport},
	obs::{self, PipelineOp},
	rate_limit::RateLimitTracker,
	retry::run_with_retry,
};

const JSON: &str = "application/json";

/// Authenticated, retrying, rate-limit-aware API client.
///
/// Cheap to clone; clones share the token source, transport, and rate-limit tracker.
#[derive(Clone)]
pub struct Client {
	tokens: Arc<dyn TokenSource>,
	transport: Arc<dyn HttpTransport>,
	config: ClientConfig,
	rate_limits: Arc<RateLimitTracker>,
}
impl Client {
	/// Creates a client that sends requests through `transport`.
	pub fn with_transport(
		tokens: impl TokenSource,
		transport: impl HttpTransport,
		config: ClientConfig,
	) -> Self {
		let rate_limits = match config.rate_limit_observer.clone() {
			Some(observer) => RateLimitTracker::with_observer(observer),
			None => RateLimitTracker::new(),
		};

		Self {
			tokens: Arc::new(tokens),
			transport: Arc::new(transport),
			config,
			rate_limits: Arc::new(rate_limits),
		}
	}

	/// Executor settings.
	pub fn config(&self) -> &ClientConfig {
		&self.config
	}

	/// Rate-limit budget observed so far.
	pub fn rate_limits(&self) -> &RateLimitTracker {
		&self.rate_limits
	}

	/// Sleeps until the rate-limit window resets when the budget is exhausted.
	pub async fn wait_for_rate_limit(&self, ctx: &CallContext) -> Result<()> {
		self.rate_limits.wait_for_rate_limit(ctx).await
	}

	/// Sends one logical request and returns the successful (2xx) response.
	///
	/// `path` is resolved against the configured base URL; a leading `/` is ignored. A `body`
	/// is sent as `application/json`.
	pub async fn request(
		&self,
		ctx: &CallContext,
		method: Method,
		path: &str,
		body: Option<Vec<u8>>,
	) -> Result<HttpResponse> {
		obs::observe(PipelineOp::Request, "send", self.send(ctx, method, path, body)).await
	}

	/// `GET`s `path` and decodes the JSON body.
	pub async fn get_json<T>(&self, ctx: &CallContext, path: &str) -> Result<T>
	where
		T: DeserializeOwned,
	{
		let response = self.request(ctx, Method::GET, path, None).await?;

		decode(&response)
	}

	/// `POST`s `body` as JSON to `path` and decodes the JSON response.
	pub async fn post_json<B, T>(&self, ctx: &CallContext, path: &str, body: &B) -> Result<T>
	where
		B: ?Sized + Serialize,
		T: DeserializeOwned,
	{
		let body = serde_json::to_vec(body).map_err(ConfigError::SerializeBody)?;
		let response = self.request(ctx, Method::POST, path, Some(body)).await?;

		decode(&response)
	}

	/// `PUT`s `body` as JSON to `path` and decodes the JSON response.
	pub async fn put_json<B, T>(&self, ctx: &CallContext, path: &str, body: &B) -> Result<T>
	where
		B: ?Sized + Serialize,
		T: DeserializeOwned,
	{
		let body = serde_json::to_vec(body).map_err(ConfigError::SerializeBody)?;
		let response = self.request(ctx, Method::PUT, path, Some(body)).await?;

		decode(&response)
	}

	/// `DELETE`s `path`, ignoring any response body.
	pub async fn delete(&self, ctx: &CallContext, path: &str) -> Result<()> {
		self.request(ctx, Method::DELETE, path, None).await.map(|_| ())
	}

	async fn send(
		&self,
		ctx: &CallContext,
		method: Method,
		path: &str,
		body: Option<Vec<u8>>,
	) -> Result<HttpResponse> {
		let url = self.resolve(path)?;
		let token = self.tokens.access_token(ctx).await?;
		let bearer = token.bearer();

		run_with_retry(ctx, self.config.retry.as_ref(), |_| {
			let request = self.build_request(&method, &url, &bearer, body.as_deref());

			async move { self.attempt(request?).await }
		})
		.await
	}

	async fn attempt(&self, request: HttpRequest) -> Result<HttpResponse> {
		let response = match self.transport.execute(request).await {
			Ok(response) => response,
			Err(e) => {
				obs::record_http_attempt(None);

				return Err(e.into());
			},
		};
		let status = response.status().as_u16();

		obs::record_http_attempt(Some(status));
		self.rate_limits.record(status, response.headers());

		if response.status().is_success() {
			Ok(response)
		} else {
			Err(ApiError::from_response(status, response.body()).into())
		}
	}

	/// Joins `path` onto the base URL, refusing anything outside the base URL's origin so the
	/// bearer token never leaves the API host.
	fn resolve(&self, path: &str) -> Result<Url> {
		let base = &self.config.base_url;
		let url = base
			.join(path.trim_start_matches('/'))
			.map_err(|source| ConfigError::InvalidPath { path: path.to_owned(), source })?;

		if url.origin() != base.origin() {
			return Err(ConfigError::ForeignOrigin {
				url: url.to_string(),
				origin: base.origin().ascii_serialization(),
			}
			.into());
		}

		Ok(url)
	}

	fn build_request(
		&self,
		method: &Method,
		url: &Url,
		bearer: &str,
		body: Option<&[u8]>,
	) -> Result<HttpRequest> {
		let mut builder = Request::builder()
			.method(method.clone())
			.uri(url.as_str())
			.header(AUTHORIZATION, bearer)
			.header(ACCEPT, JSON)
			.header(USER_AGENT, self.config.user_agent.as_str());

		if body.is_some() {
			builder = builder.header(CONTENT_TYPE, JSON);
		}

		builder
			.body(body.map(<[u8]>::to_vec).unwrap_or_default())
			.map_err(|e| ConfigError::from(e).into())
	}
}
#[cfg(feature = "reqwest")]
impl Client {
	/// Creates a client backed by the default reqwest transport.
	pub fn new(tokens: impl TokenSource, config: ClientConfig) -> Result<Self> {
		Ok(Self::with_transport(tokens, ReqwestTransport::new()?, config))
	}
}
impl Debug for Client {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Client")
			.field("config", &self.config)
			.field("rate_limits", &self.rate_limits)
			.finish()
	}
}

fn decode<T>(response: &HttpResponse) -> Result<T>
where
	T: DeserializeOwned,
{
	let status = response.status().as_u16();
	let mut deserializer = serde_json::Deserializer::from_slice(response.body());

	serde_path_to_error::deserialize(&mut deserializer)
		.map_err(|source| Error::Decode { source, status })
}

#[cfg(test)]
mod tests {
	// std
	use std::{
		sync::atomic::{AtomicUsize, Ordering},
		time::Duration as StdDuration,
	};
	// self
	use super::*;
	use crate::{
		_preludet::{Scripted, ScriptedTransport},
		error::ErrorKind,
		flows::StaticToken,
		retry::RetryPolicy,
	};

	#[derive(Debug, Deserialize)]
	struct Echo {
		id: String,
	}

	fn fast_retry(max_retries: u32) -> ClientConfig {
		ClientConfig::default().with_retry(Some(
			RetryPolicy::default()
				.with_max_retries(max_retries)
				.with_backoff(StdDuration::from_millis(10), StdDuration::from_millis(50)),
		))
	}

	fn client(
		script: impl IntoIterator<Item = Scripted>,
		config: ClientConfig,
	) -> (Client, ScriptedTransport) {
		let transport = ScriptedTransport::new(script);

		(Client::with_transport(StaticToken::new("pat-1"), transport.clone(), config), transport)
	}

	#[tokio::test]
	async fn attaches_standard_headers() {
		let (client, transport) = client([Scripted::json(200, r#"{"id":"d1"}"#)], fast_retry(0));
		let echo: Echo = client
			.post_json(&CallContext::new(), "/devices/d1/commands", &serde_json::json!({"a": 1}))
			.await
			.expect("Request should succeed.");

		assert_eq!(echo.id, "d1");

		let requests = transport.requests();
		let request = &requests[0];
		let headers = request.headers();

		assert_eq!(request.method(), Method::POST);
		assert_eq!(
			request.uri().to_string(),
			"https://api.smartthings.com/v1/devices/d1/commands"
		);
		assert_eq!(headers[AUTHORIZATION], "Bearer pat-1");
		assert_eq!(headers[ACCEPT], JSON);
		assert_eq!(headers[CONTENT_TYPE], JSON);
		assert!(headers.contains_key(USER_AGENT));
		assert_eq!(request.body().as_slice(), br#"{"a":1}"#);
	}

	#[tokio::test]
	async fn get_requests_carry_no_content_type() {
		let (client, transport) = client([Scripted::json(200, r#"{"id":"d1"}"#)], fast_retry(0));
		let _: Echo =
			client.get_json(&CallContext::new(), "devices/d1").await.expect("GET should succeed.");
		let requests = transport.requests();

		assert!(!requests[0].headers().contains_key(CONTENT_TYPE));
		assert!(requests[0].body().is_empty());
	}

	#[tokio::test(start_paused = true)]
	async fn retries_rate_limited_responses_and_tracks_every_one() {
		let observed = Arc::new(AtomicUsize::new(0));
		let counter = observed.clone();
		let config = fast_retry(2).with_rate_limit_observer(Arc::new(move |_| {
			counter.fetch_add(1, Ordering::SeqCst);
		}));
		let (client, transport) = client(
			[
				Scripted::status(429).with_header("X-RateLimit-Remaining", "0"),
				Scripted::status(503).with_header("X-RateLimit-Remaining", "0"),
				Scripted::json(200, r#"{"id":"d1"}"#)
					.with_header("X-RateLimit-Limit", "250")
					.with_header("X-RateLimit-Remaining", "249"),
			],
			config,
		);
		let echo: Echo =
			client.get_json(&CallContext::new(), "devices/d1").await.expect("Third try succeeds.");

		assert_eq!(echo.id, "d1");
		assert_eq!(transport.calls(), 3);
		assert_eq!(observed.load(Ordering::SeqCst), 3);
		assert_eq!(client.rate_limits().remaining(), Some(249));
		assert_eq!(client.rate_limits().limit(), Some(250));
	}

	#[tokio::test]
	async fn fatal_status_maps_structured_error() {
		let (client, transport) = client(
			[Scripted::json(
				404,
				r#"{"requestId":"req-9","error":{"code":"NotFound","message":"No such device"}}"#,
			)],
			fast_retry(3),
		);
		let err = client
			.get_json::<Echo>(&CallContext::new(), "devices/missing")
			.await
			.expect_err("404 should fail.");
		let api = err.as_api_error().expect("Should be an API error.");

		assert_eq!(transport.calls(), 1);
		assert_eq!(err.kind(), ErrorKind::FatalApi);
		assert_eq!(api.status, 404);
		assert_eq!(api.code.as_deref(), Some("NotFound"));
		assert_eq!(api.request_id.as_deref(), Some("req-9"));
	}

	#[tokio::test(start_paused = true)]
	async fn exhausted_rate_limit_stays_classifiable() {
		let (client, transport) = client([Scripted::status(429)], fast_retry(2));
		let err = client
			.delete(&CallContext::new(), "devices/d1")
			.await
			.expect_err("Persistent 429 should fail.");

		assert_eq!(transport.calls(), 3);
		assert!(err.is_rate_limited());
		assert_eq!(err.kind(), ErrorKind::RetryExhausted);
	}

	#[tokio::test]
	async fn missing_token_prevents_network_io() {
		let transport = ScriptedTransport::new([Scripted::status(200)]);
		let client =
			Client::with_transport(StaticToken::new(""), transport.clone(), fast_retry(3));
		let err = client
			.delete(&CallContext::new(), "devices/d1")
			.await
			.expect_err("Blank token should fail.");

		assert_eq!(err.kind(), ErrorKind::Unauthenticated);
		assert_eq!(transport.calls(), 0);
	}

	#[tokio::test]
	async fn undecodable_success_reports_path() {
		let (client, _) = client([Scripted::json(200, r#"{"id":7}"#)], fast_retry(0));
		let err = client
			.get_json::<Echo>(&CallContext::new(), "devices/d1")
			.await
			.expect_err("Wrong shape should fail.");

		match err {
			Error::Decode { source, status } => {
				assert_eq!(status, 200);
				assert_eq!(source.path().to_string(), "id");
			},
			other => panic!("Unexpected error: {other:?}."),
		}
	}

	#[tokio::test]
	async fn invalid_paths_are_configuration_errors() {
		let (client, transport) = client([], fast_retry(0));
		let err = client
			.delete(&CallContext::new(), "http://[::1")
			.await
			.expect_err("Malformed path should fail.");

		assert_eq!(err.kind(), ErrorKind::Configuration);
		assert_eq!(transport.calls(), 0);
	}

	#[tokio::test]
	async fn absolute_urls_on_other_origins_are_refused() {
		let (client, transport) = client([Scripted::json(200, "{}")], fast_retry(0));
		let ctx = CallContext::new();

		for path in ["https://evil.example.net/steal", "http://api.smartthings.com/v1/devices"] {
			let err = client.delete(&ctx, path).await.expect_err("Foreign origin must fail.");

			assert!(matches!(err, Error::Config(ConfigError::ForeignOrigin { .. })));
		}

		assert_eq!(transport.calls(), 0);

		client
			.delete(&ctx, "https://api.smartthings.com/v1/devices/d-1")
			.await
			.expect("Same-origin absolute URLs are allowed.");

		assert_eq!(transport.calls(), 1);
	}
}
