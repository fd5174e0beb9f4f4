//! Resilient SmartThings API client: concurrency-safe OAuth token refresh, classified retries
//! with exponential backoff, and rate-limit tracking behind a single request pipeline.
//!
//! Every API call flows through [`client::Client`]: the configured [`flows::TokenSource`]
//! supplies a valid bearer token (refreshing at most once per stale window no matter how many
//! callers race), the [`retry`] engine replays transient failures, and the
//! [`rate_limit::RateLimitTracker`] records the budget advertised by each response.

#![deny(clippy::all)]
#![warn(missing_docs, unused_crate_dependencies)]

pub mod api;
pub mod auth;
pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod flows;
pub mod http;
pub mod oauth;
pub mod obs;
pub mod rate_limit;
pub mod retry;
pub mod store;
#[cfg(feature = "reqwest")]
#[doc(hidden)]
pub mod _preludet {
	//! Convenience re-exports and fixtures shared by unit and integration tests.

	pub use crate::_prelude::*;

	// std
	use std::sync::atomic::{AtomicUsize, Ordering};
	// self
	use crate::{
		auth::TokenState,
		config::OAuthConfig,
		error::TransportError,
		flows::TokenManager,
		http::{HttpRequest, HttpResponse, HttpTransport, ReqwestTransport, TransportFuture},
		store::{MemoryStore, TokenStore},
	};

	/// Builds a reqwest transport that accepts the self-signed certificates produced by
	/// `httpmock` during tests.
	pub fn test_reqwest_transport() -> ReqwestTransport {
		let client = ReqwestClient::builder()
			.danger_accept_invalid_certs(true)
			.danger_accept_invalid_hostnames(true)
			.build()
			.expect("Failed to build insecure Reqwest client for tests.");

		ReqwestTransport::with_client(client)
	}

	/// Builds an [`OAuthConfig`] whose endpoints point at the provided mock server base URL.
	pub fn test_oauth_config(base: &str) -> OAuthConfig {
		OAuthConfig::builder("client-test")
			.client_secret("secret-test")
			.redirect_uri(
				Url::parse("https://app.example.com/callback")
					.expect("Redirect URI fixture should parse."),
			)
			.authorization_endpoint(
				Url::parse(&format!("{base}/oauth/authorize"))
					.expect("Authorization endpoint fixture should parse."),
			)
			.token_endpoint(
				Url::parse(&format!("{base}/oauth/token"))
					.expect("Token endpoint fixture should parse."),
			)
			.build()
			.expect("OAuth config fixture should validate.")
	}

	/// Constructs a [`TokenManager`] backed by an in-memory store and the insecure test
	/// transport.
	pub fn build_test_manager(config: OAuthConfig) -> (TokenManager, Arc<MemoryStore>) {
		let store_backend = Arc::new(MemoryStore::default());
		let store: Arc<dyn TokenStore> = store_backend.clone();
		let manager = TokenManager::with_transport(config, store, test_reqwest_transport());

		(manager, store_backend)
	}

	/// Builds a token state that expires `expires_in` from now, optionally carrying a refresh
	/// token that lives for `refresh_expires_in`.
	pub fn token_fixture(
		access: &str,
		expires_in: Duration,
		refresh: Option<(&str, Duration)>,
	) -> TokenState {
		let mut builder = TokenState::builder().access_token(access).expires_in(expires_in);

		if let Some((secret, lifetime)) = refresh {
			builder = builder.refresh_token(secret).refresh_expires_in(lifetime);
		}

		builder.build().expect("Token state fixture should build.")
	}

	/// Scripted response returned by [`ScriptedTransport`].
	#[derive(Clone, Debug)]
	pub enum Scripted {
		/// Respond with the status, headers, and body.
		Respond {
			/// HTTP status code.
			status: u16,
			/// Response headers.
			headers: Vec<(&'static str, String)>,
			/// Response body.
			body: String,
		},
		/// Fail with a connection-level timeout.
		Timeout,
	}
	impl Scripted {
		/// Shorthand for a bodiless response with the provided status.
		pub fn status(status: u16) -> Self {
			Self::Respond { status, headers: Vec::new(), body: String::new() }
		}

		/// Shorthand for a JSON response with the provided status.
		pub fn json(status: u16, body: &str) -> Self {
			Self::Respond {
				status,
				headers: vec![("content-type", "application/json".into())],
				body: body.into(),
			}
		}

		/// Appends a header to a scripted response.
		pub fn with_header(self, name: &'static str, value: impl Into<String>) -> Self {
			match self {
				Self::Respond { status, mut headers, body } => {
					headers.push((name, value.into()));

					Self::Respond { status, headers, body }
				},
				other => other,
			}
		}
	}

	#[derive(Debug)]
	struct ScriptedTimeout;
	impl Display for ScriptedTimeout {
		fn fmt(&self, f: &mut Formatter) -> FmtResult {
			f.write_str("Scripted transport timed out.")
		}
	}
	impl StdError for ScriptedTimeout {}

	/// In-process transport that replays a script and records every request it receives.
	///
	/// Once the script runs out the final entry is repeated.
	#[derive(Clone, Default)]
	pub struct ScriptedTransport {
		script: Arc<Mutex<Vec<Scripted>>>,
		calls: Arc<AtomicUsize>,
		requests: Arc<Mutex<Vec<HttpRequest>>>,
	}
	impl ScriptedTransport {
		/// Creates a transport that replays `script` in order.
		pub fn new(script: impl IntoIterator<Item = Scripted>) -> Self {
			Self {
				script: Arc::new(Mutex::new(script.into_iter().collect())),
				calls: Default::default(),
				requests: Default::default(),
			}
		}

		/// Number of physical attempts observed so far.
		pub fn calls(&self) -> usize {
			self.calls.load(Ordering::SeqCst)
		}

		/// Requests captured so far, in dispatch order.
		pub fn requests(&self) -> Vec<HttpRequest> {
			self.requests.lock().clone()
		}
	}
	impl HttpTransport for ScriptedTransport {
		fn execute(&self, request: HttpRequest) -> TransportFuture<'_> {
			Box::pin(async move {
				let index = self.calls.fetch_add(1, Ordering::SeqCst);

				self.requests.lock().push(request);

				let next = {
					let script = self.script.lock();

					script
						.get(index)
						.or_else(|| script.last())
						.cloned()
						.unwrap_or_else(|| Scripted::status(200))
				};

				match next {
					Scripted::Respond { status, headers, body } => {
						let mut builder = oauth2::http::Response::builder().status(status);

						for (name, value) in headers {
							builder = builder.header(name, value);
						}

						let response: HttpResponse = builder
							.body(body.into_bytes())
							.expect("Scripted response should build.");

						Ok(response)
					},
					Scripted::Timeout => Err(TransportError::timeout(ScriptedTimeout)),
				}
			})
		}
	}
}

mod _prelude {
	pub use std::{
		collections::HashMap,
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		str::FromStr,
		sync::Arc,
	};

	pub use async_lock::Mutex as AsyncMutex;
	pub use parking_lot::{Mutex, RwLock};
	#[cfg(feature = "reqwest")]
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

#[cfg(feature = "reqwest")] pub use reqwest;
pub use url;
#[cfg(test)] use {color_eyre as _, httpmock as _};
