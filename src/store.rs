//! Persistence contract for [`TokenState`] plus the file and memory implementations.
//!
//! The lifecycle manager only ever calls [`TokenStore::save`], [`TokenStore::load`], and
//! [`TokenStore::clear`]; everything else about where tokens live is up to the backend.

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

// self
use crate::{_prelude::*, auth::TokenState};

/// Boxed future returned by [`TokenStore`] operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + 'a + Send>>;

/// Storage backend contract for persisted token state.
pub trait TokenStore
where
	Self: Send + Sync,
{
	/// Persists `state`, replacing whatever was stored before.
	fn save(&self, state: TokenState) -> StoreFuture<'_, ()>;

	/// Loads the persisted state.
	///
	/// Fails with [`StoreError::NotFound`] when nothing was saved and with
	/// [`StoreError::Serialization`] when the persisted data is malformed.
	fn load(&self) -> StoreFuture<'_, TokenState>;

	/// Deletes persisted state. Clearing an empty store succeeds.
	fn clear(&self) -> StoreFuture<'_, ()>;
}

/// Error type produced by [`TokenStore`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// Nothing has been persisted yet.
	#[error("No persisted token state at {location}.")]
	NotFound {
		/// Backend-specific location (file path, `memory`, ...).
		location: String,
	},
	/// Persisted data could not be encoded or decoded.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// Backend-level failure for the storage engine.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
}
impl StoreError {
	/// Returns `true` when the store simply had nothing saved.
	pub fn is_not_found(&self) -> bool {
		matches!(self, Self::NotFound { .. })
	}
}
