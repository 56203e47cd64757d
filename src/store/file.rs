//! File-backed [`CredentialStore`] whose contents survive process restarts.

// std
use std::{
	fs::{self, File},
	io::Write,
	path::{Path, PathBuf},
};
// self
use crate::{
	_prelude::*,
	auth::{CredentialKey, CredentialPair, TokenSecret},
	store::{CredentialMap, CredentialStore, StoreError, pair_entries},
};

/// Persists credentials to a JSON object (`{"accessToken": .., "refreshToken": ..}`) after each
/// mutation.
#[derive(Clone, Debug)]
pub struct FileStore {
	path: PathBuf,
	inner: Arc<RwLock<CredentialMap>>,
}
impl FileStore {
	/// Opens (or creates) a store at the provided path, eagerly loading existing data.
	pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
		let path = path.into();

		Self::ensure_parent_exists(&path)?;

		let snapshot = Self::load_snapshot(&path)?;

		Ok(Self { path, inner: Arc::new(RwLock::new(snapshot)) })
	}

	/// Location of the backing file.
	pub fn path(&self) -> &Path {
		&self.path
	}

	fn load_snapshot(path: &Path) -> Result<CredentialMap, StoreError> {
		if !path.exists() {
			return Ok(CredentialMap::new());
		}

		let bytes = fs::read(path).map_err(|e| StoreError::Backend {
			message: format!("Failed to read {}: {e}", path.display()),
		})?;

		if bytes.is_empty() {
			return Ok(CredentialMap::new());
		}

		serde_json::from_slice(&bytes).map_err(|e| StoreError::Serialization {
			message: format!("Failed to parse {}: {e}", path.display()),
		})
	}

	fn ensure_parent_exists(path: &Path) -> Result<(), StoreError> {
		if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
			fs::create_dir_all(parent).map_err(|e| StoreError::Backend {
				message: format!("Failed to create store directory {}: {e}", parent.display()),
			})?;
		}

		Ok(())
	}

	fn persist_locked(&self, contents: &CredentialMap) -> Result<(), StoreError> {
		Self::ensure_parent_exists(&self.path)?;

		let serialized =
			serde_json::to_vec_pretty(contents).map_err(|e| StoreError::Serialization {
				message: format!("Failed to serialize credentials: {e}"),
			})?;
		let mut tmp_path = self.path.clone();

		tmp_path.set_extension("tmp");

		{
			let mut file = File::create(&tmp_path).map_err(|e| StoreError::Backend {
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

	/// Applies `mutate` to a copy of the map, persists it, then publishes it.
	///
	/// Readers keep seeing the previous contents if persisting fails.
	fn mutate(&self, mutate: impl FnOnce(&mut CredentialMap)) -> Result<(), StoreError> {
		let mut guard = self.inner.write();
		let mut next = guard.clone();

		mutate(&mut next);
		self.persist_locked(&next)?;

		*guard = next;

		Ok(())
	}
}
impl CredentialStore for FileStore {
	fn read(&self, key: CredentialKey) -> Result<Option<TokenSecret>, StoreError> {
		Ok(self.inner.read().get(&key).cloned())
	}

	fn write(&self, key: CredentialKey, value: TokenSecret) -> Result<(), StoreError> {
		self.mutate(|map| {
			map.insert(key, value);
		})
	}

	fn clear(&self) -> Result<(), StoreError> {
		self.mutate(CredentialMap::clear)
	}

	fn replace(&self, pair: &CredentialPair) -> Result<(), StoreError> {
		self.mutate(|map| map.extend(pair_entries(pair)))
	}
}
