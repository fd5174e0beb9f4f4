//! Durable file-backed [`TokenStore`] that survives process restarts.

// std
use std::{
	fs::{self, File, OpenOptions},
	io::{ErrorKind as IoErrorKind, Write},
	path::{Path, PathBuf},
};
// self
use crate::{
	_prelude::*,
	auth::TokenState,
	store::{StoreError, StoreFuture, TokenStore},
};

/// Persists token state as a JSON object after each save.
///
/// Writes go to a sibling `.tmp` file that is synced and then renamed over the target, so a
/// crash never leaves a half-written token file behind. On Unix the file is created with mode
/// `0600`. Missing parent directories are created on demand.
#[derive(Clone, Debug)]
pub struct FileStore {
	path: PathBuf,
	write_lock: Arc<Mutex<()>>,
}
impl FileStore {
	/// Creates a store rooted at `path`. Nothing touches the disk until the first save.
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into(), write_lock: Default::default() }
	}

	/// Location of the token file.
	pub fn path(&self) -> &Path {
		&self.path
	}

	fn ensure_parent_exists(&self) -> Result<(), StoreError> {
		if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
			fs::create_dir_all(parent).map_err(|e| StoreError::Backend {
				message: format!("Failed to create store directory {}: {e}", parent.display()),
			})?;
		}

		Ok(())
	}

	fn persist(&self, state: &TokenState) -> Result<(), StoreError> {
		let serialized = serde_json::to_vec_pretty(state).map_err(|e| StoreError::Serialization {
			message: format!("Failed to serialize token state: {e}"),
		})?;
		let _guard = self.write_lock.lock();

		self.ensure_parent_exists()?;

		let mut tmp_path = self.path.clone();

		tmp_path.set_extension("tmp");

		{
			let mut file = create_private(&tmp_path).map_err(|e| StoreError::Backend {
				message: format!("Failed to create {}: {e}", tmp_path.display()),
			})?;

			file.write_all(&serialized).map_err(|e| StoreError::Backend {
				message: format!("Failed to write {}: {e}", tmp_path.display()),
			})?;
			file.sync_all().map_err(|e| StoreError::Backend {
				message: format!("Failed to sync {}: {e}", tmp_path.display()),
			})?;
		}

		fs::rename(&tmp_path, &self.path).map_err(|e| StoreError::Backend {
			message: format!("Failed to replace {}: {e}", self.path.display()),
		})
	}

	fn read(&self) -> Result<TokenState, StoreError> {
		let bytes = fs::read(&self.path).map_err(|e| match e.kind() {
			IoErrorKind::NotFound =>
				StoreError::NotFound { location: self.path.display().to_string() },
			_ => StoreError::Backend {
				message: format!("Failed to read {}: {e}", self.path.display()),
			},
		})?;
		let mut de = serde_json::Deserializer::from_slice(&bytes);

		serde_path_to_error::deserialize(&mut de).map_err(|e| StoreError::Serialization {
			message: format!("Failed to parse {}: {e}", self.path.display()),
		})
	}

	fn remove(&self) -> Result<(), StoreError> {
		let _guard = self.write_lock.lock();

		match fs::remove_file(&self.path) {
			Ok(()) => Ok(()),
			Err(e) if e.kind() == IoErrorKind::NotFound => Ok(()),
			Err(e) => Err(StoreError::Backend {
				message: format!("Failed to remove {}: {e}", self.path.display()),
			}),
		}
	}
}
impl TokenStore for FileStore {
	fn save(&self, state: TokenState) -> StoreFuture<'_, ()> {
		Box::pin(async move { self.persist(&state) })
	}

	fn load(&self) -> StoreFuture<'_, TokenState> {
		Box::pin(async move { self.read() })
	}

	fn clear(&self) -> StoreFuture<'_, ()> {
		Box::pin(async move { self.remove() })
	}
}

#[cfg(unix)]
fn create_private(path: &Path) -> std::io::Result<File> {
	// std
	use std::os::unix::fs::OpenOptionsExt;

	OpenOptions::new().write(true).create(true).truncate(true).mode(0o600).open(path)
}

#[cfg(not(unix))]
fn create_private(path: &Path) -> std::io::Result<File> {
	OpenOptions::new().write(true).create(true).truncate(true).open(path)
}
