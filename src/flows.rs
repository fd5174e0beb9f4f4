//! Token sources and the OAuth token lifecycle manager.
//!
//! [`TokenSource`] is the single capability the request executor depends on. [`StaticToken`]
//! serves a fixed personal access token, while [`TokenManager`] owns OAuth-issued
//! [`TokenState`], refreshes it through the token endpoint, and persists it through a
//! [`TokenStore`].

pub mod authorize;
pub mod refresh;

pub use authorize::*;
pub use refresh::*;

// std
use std::sync::atomic::AtomicU64;
// crates.io
use tokio::task::JoinHandle;
// self
#[cfg(feature = "reqwest")] use crate::http::ReqwestTransport;
use crate::{
	_prelude::*,
	auth::{TokenSecret, TokenState, TokenStatus},
	config::OAuthConfig,
	context::CallContext,
	error::{ResultExt, TokenEndpointError},
	http::HttpTransport,
	oauth::TokenEndpoint,
	obs,
	store::TokenStore,
};

/// Boxed future returned by [`TokenSource::access_token`].
pub type TokenFuture<'a> = Pin<Box<dyn Future<Output = Result<TokenSecret>> + 'a + Send>>;

/// Supplies a bearer token that is valid for the next request.
pub trait TokenSource
where
	Self: 'static + Send + Sync,
{
	/// Returns a usable access token, refreshing it first if needed.
	fn access_token<'a>(&'a self, ctx: &'a CallContext) -> TokenFuture<'a>;
}
impl<T> TokenSource for Arc<T>
where
	T: ?Sized + TokenSource,
{
	fn access_token<'a>(&'a self, ctx: &'a CallContext) -> TokenFuture<'a> {
		(**self).access_token(ctx)
	}
}

/// Fixed personal access token that never refreshes.
#[derive(Clone, Debug)]
pub struct StaticToken(TokenSecret);
impl StaticToken {
	/// Wraps a personal access token.
	pub fn new(token: impl Into<String>) -> Self {
		Self(TokenSecret::new(token))
	}
}
impl TokenSource for StaticToken {
	fn access_token<'a>(&'a self, ctx: &'a CallContext) -> TokenFuture<'a> {
		Box::pin(async move {
			ctx.check()?;

			if self.0.is_blank() { Err(Error::Unauthenticated) } else { Ok(self.0.clone()) }
		})
	}
}

#[derive(Debug, Default)]
struct TokenSlot {
	state: Option<TokenState>,
	last_failure: Option<TokenEndpointError>,
}

/// Owns OAuth token state and keeps it fresh.
///
/// All reads and writes of the token go through one async mutex, and the lock is held across
/// the whole check-and-refresh sequence, so concurrent callers that find the token stale
/// trigger exactly one refresh request. Clones share the same state.
///
/// Tokens obtained by a refresh are persisted on a background task after the lock is released;
/// [`TokenManager::flush`] waits for those writes.
#[derive(Clone)]
pub struct TokenManager {
	config: Arc<OAuthConfig>,
	endpoint: Arc<TokenEndpoint>,
	store: Arc<dyn TokenStore>,
	slot: Arc<AsyncMutex<TokenSlot>>,
	failure_epoch: Arc<AtomicU64>,
	pending_save: Arc<Mutex<Option<JoinHandle<()>>>>,
	/// Shared counters for lifecycle outcomes.
	pub refresh_metrics: Arc<RefreshMetrics>,
}
impl TokenManager {
	/// Creates a manager that talks to the token endpoint through `transport`.
	pub fn with_transport(
		config: OAuthConfig,
		store: Arc<dyn TokenStore>,
		transport: impl HttpTransport,
	) -> Self {
		let transport: Arc<dyn HttpTransport> = Arc::new(transport);
		let endpoint = TokenEndpoint::new(&config, transport);

		Self {
			config: Arc::new(config),
			endpoint: Arc::new(endpoint),
			store,
			slot: Default::default(),
			failure_epoch: Default::default(),
			pending_save: Default::default(),
			refresh_metrics: Default::default(),
		}
	}

	/// Validated configuration.
	pub fn config(&self) -> &OAuthConfig {
		&self.config
	}

	/// Backing token store.
	pub fn store(&self) -> &Arc<dyn TokenStore> {
		&self.store
	}

	/// Replaces the token state wholesale and persists it.
	///
	/// The in-memory state is updated even when persistence fails; the failure is still
	/// returned so explicit callers learn about it.
	pub async fn set_tokens(&self, state: TokenState) -> Result<()> {
		let mut slot = self.slot.lock().await;

		slot.state = Some(state.clone());
		slot.last_failure = None;

		self.settle_pending_save().await;
		self.store.save(state).await.context("tokens.save")
	}

	/// Forgets the token state and deletes the persisted copy. Safe to call repeatedly.
	pub async fn clear(&self) -> Result<()> {
		let mut slot = self.slot.lock().await;

		slot.state = None;
		slot.last_failure = None;

		self.settle_pending_save().await;
		self.store.clear().await.context("tokens.clear")
	}

	/// Waits until tokens from earlier refreshes have been written to the store.
	///
	/// Write failures were already logged and are not returned here.
	pub async fn flush(&self, ctx: &CallContext) -> Result<()> {
		let pending = self.pending_save.lock().take();

		if let Some(handle) = pending {
			if let Err(e) = ctx.run(handle).await? {
				obs::event!(warn, error = %e, "Background token persistence task aborted.");
			}
		}

		Ok(())
	}

	/// Queues `state` for persistence behind any write still in flight.
	///
	/// Must be called while the token lock is held so writes land in refresh order.
	pub(crate) fn persist_in_background(&self, state: TokenState) {
		let store = self.store.clone();
		let mut pending = self.pending_save.lock();
		let previous = pending.take();

		*pending = Some(tokio::spawn(async move {
			if let Some(previous) = previous {
				let _ = previous.await;
			}
			if let Err(e) = store.save(state).await {
				obs::event!(
					warn,
					error = %e,
					"Persisting refreshed tokens failed; the in-memory copy stays authoritative."
				);
			}
		}));
	}

	async fn settle_pending_save(&self) {
		let pending = self.pending_save.lock().take();

		if let Some(handle) = pending {
			let _ = handle.await;
		}
	}

	/// Loads persisted tokens into memory, typically at startup.
	pub async fn restore(&self, ctx: &CallContext) -> Result<TokenState> {
		let state = ctx.run(self.store.load()).await?.context("tokens.load")?;
		let mut slot = ctx.lock(&self.slot).await?;

		slot.state = Some(state.clone());
		slot.last_failure = None;

		Ok(state)
	}

	/// Clone of the in-memory token state, if any.
	pub async fn current(&self) -> Option<TokenState> {
		self.slot.lock().await.state.clone()
	}

	/// Lifecycle status of the in-memory token; `None` means unauthenticated.
	pub async fn status(&self) -> Option<TokenStatus> {
		let slot = self.slot.lock().await;

		slot.state
			.as_ref()
			.map(|state| state.status_at(OffsetDateTime::now_utc(), self.config.refresh_buffer))
	}
}
#[cfg(feature = "reqwest")]
impl TokenManager {
	/// Creates a manager backed by the default reqwest transport.
	pub fn new(config: OAuthConfig, store: Arc<dyn TokenStore>) -> Result<Self> {
		Ok(Self::with_transport(config, store, ReqwestTransport::new()?))
	}
}
impl TokenSource for TokenManager {
	fn access_token<'a>(&'a self, ctx: &'a CallContext) -> TokenFuture<'a> {
		Box::pin(async move { self.ensure_valid(ctx).await.map(|state| state.access_token) })
	}
}
impl Debug for TokenManager {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenManager")
			.field("client_id", &self.config.client_id)
			.field("endpoint", &self.endpoint)
			.field("refresh_metrics", &self.refresh_metrics)
			.finish()
	}
}
