//! Transport primitives shared by the token endpoint facade and the request executor.
//!
//! [`HttpTransport`] is the crate's only dependency on an HTTP stack. The executor calls it
//! directly, while the OAuth facade borrows it through [`TokenEndpointHandle`], an
//! [`AsyncHttpClient`] adapter that records the response status in a
//! [`ResponseMetadataSlot`] so token endpoint rejections keep their HTTP status.

// crates.io
use oauth2::AsyncHttpClient;
// self
use crate::{_prelude::*, error::TransportError};

/// Outgoing request shape (`http::Request<Vec<u8>>`).
pub type HttpRequest = oauth2::HttpRequest;
/// Incoming response shape (`http::Response<Vec<u8>>`).
pub type HttpResponse = oauth2::HttpResponse;
/// Boxed future returned by [`HttpTransport::execute`].
pub type TransportFuture<'a> =
	Pin<Box<dyn Future<Output = Result<HttpResponse, TransportError>> + 'a + Send>>;

/// Executes a fully-formed HTTP request and returns the buffered response.
///
/// Any status code counts as a successful round trip; only connection-level failures
/// (DNS, TCP, TLS, timeouts) are reported as [`TransportError`]. Implementations must not
/// follow redirects on behalf of the token endpoint.
pub trait HttpTransport
where
	Self: 'static + Send + Sync,
{
	/// Sends `request` and buffers the whole response body.
	fn execute(&self, request: HttpRequest) -> TransportFuture<'_>;
}
impl<T> HttpTransport for Arc<T>
where
	T: ?Sized + HttpTransport,
{
	fn execute(&self, request: HttpRequest) -> TransportFuture<'_> {
		(**self).execute(request)
	}
}

/// Captures metadata from the most recent token endpoint response.
#[derive(Clone, Debug, Default)]
pub struct ResponseMetadata {
	/// HTTP status code, if a response arrived.
	pub status: Option<u16>,
}

/// Thread-safe slot for sharing [`ResponseMetadata`] between the transport adapter and
/// error mapping.
#[derive(Clone, Debug, Default)]
pub struct ResponseMetadataSlot(Arc<Mutex<Option<ResponseMetadata>>>);
impl ResponseMetadataSlot {
	/// Stores new metadata for the current request.
	pub fn store(&self, meta: ResponseMetadata) {
		*self.0.lock() = Some(meta);
	}

	/// Returns the captured metadata, if any, consuming it from the slot.
	pub fn take(&self) -> Option<ResponseMetadata> {
		self.0.lock().take()
	}
}

/// [`AsyncHttpClient`] adapter that routes `oauth2` token requests through an
/// [`HttpTransport`] while recording response metadata.
#[derive(Clone)]
pub struct TokenEndpointHandle {
	transport: Arc<dyn HttpTransport>,
	slot: ResponseMetadataSlot,
}
impl TokenEndpointHandle {
	/// Wraps `transport`, recording each response's status in `slot`.
	pub fn new(transport: Arc<dyn HttpTransport>, slot: ResponseMetadataSlot) -> Self {
		Self { transport, slot }
	}
}
impl<'c> AsyncHttpClient<'c> for TokenEndpointHandle {
	type Error = TransportError;
	type Future = Pin<Box<dyn Future<Output = Result<HttpResponse, Self::Error>> + 'c + Send>>;

	fn call(&'c self, request: HttpRequest) -> Self::Future {
		Box::pin(async move {
			self.slot.take();

			let response = self.transport.execute(request).await?;

			self.slot.store(ResponseMetadata { status: Some(response.status().as_u16()) });

			Ok(response)
		})
	}
}

/// [`HttpTransport`] backed by a shared [`ReqwestClient`].
///
/// The default client disables redirect following so token endpoint responses are returned
/// directly.
#[cfg(feature = "reqwest")]
#[derive(Clone, Debug)]
pub struct ReqwestTransport(ReqwestClient);
#[cfg(feature = "reqwest")]
impl ReqwestTransport {
	/// Builds a transport with redirects disabled.
	pub fn new() -> Result<Self> {
		let client = ReqwestClient::builder()
			.redirect(reqwest::redirect::Policy::none())
			.build()
			.map_err(crate::error::ConfigError::http_client_build)?;

		Ok(Self(client))
	}

	/// Wraps an existing reqwest [`ReqwestClient`].
	pub fn with_client(client: ReqwestClient) -> Self {
		Self(client)
	}
}
#[cfg(feature = "reqwest")]
impl Default for ReqwestTransport {
	fn default() -> Self {
		Self::new().unwrap_or_else(|_| Self(ReqwestClient::default()))
	}
}
#[cfg(feature = "reqwest")]
impl AsRef<ReqwestClient> for ReqwestTransport {
	fn as_ref(&self) -> &ReqwestClient {
		&self.0
	}
}
#[cfg(feature = "reqwest")]
impl HttpTransport for ReqwestTransport {
	fn execute(&self, request: HttpRequest) -> TransportFuture<'_> {
		Box::pin(async move {
			let request: reqwest::Request = request.try_into().map_err(TransportError::from)?;
			let response = self.0.execute(request).await?;
			let status = response.status();
			let headers = response.headers().to_owned();
			let mut response_new = HttpResponse::new(response.bytes().await?.to_vec());

			*response_new.status_mut() = status;
			*response_new.headers_mut() = headers;

			Ok(response_new)
		})
	}
}
