//! Thread-safe in-memory [`TokenStore`] for tests, demos, and short-lived processes.

// self
use crate::{
	_prelude::*,
	auth::TokenState,
	store::{StoreError, StoreFuture, TokenStore},
};

const LOCATION: &str = "memory";

/// Keeps the persisted token state in-process; clones share the same slot.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore(Arc<RwLock<Option<TokenState>>>);
impl MemoryStore {
	/// Creates a store pre-populated with `state`.
	pub fn with_state(state: TokenState) -> Self {
		Self(Arc::new(RwLock::new(Some(state))))
	}

	/// Returns the stored state without going through the async contract.
	pub fn snapshot(&self) -> Option<TokenState> {
		self.0.read().clone()
	}
}
impl TokenStore for MemoryStore {
	fn save(&self, state: TokenState) -> StoreFuture<'_, ()> {
		Box::pin(async move {
			*self.0.write() = Some(state);

			Ok(())
		})
	}

	fn load(&self) -> StoreFuture<'_, TokenState> {
		Box::pin(async move {
			self.0.read().clone().ok_or_else(|| StoreError::NotFound { location: LOCATION.into() })
		})
	}

	fn clear(&self) -> StoreFuture<'_, ()> {
		Box::pin(async move {
			self.0.write().take();

			Ok(())
		})
	}
}
