//! Thread-safe in-memory [`CredentialStore`] for tests and short-lived processes.

// self
use crate::{
	_prelude::*,
	auth::{CredentialKey, CredentialPair, TokenSecret},
	store::{CredentialMap, CredentialStore, StoreError, pair_entries},
};

/// Storage backend that keeps credentials in-process for the lifetime of the value.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore(Arc<RwLock<CredentialMap>>);
impl MemoryStore {
	/// Returns how many keys are currently stored.
	pub fn len(&self) -> usize {
		self.0.read().len()
	}

	/// Whether no credential is stored.
	pub fn is_empty(&self) -> bool {
		self.0.read().is_empty()
	}
}
impl CredentialStore for MemoryStore {
	fn read(&self, key: CredentialKey) -> Result<Option<TokenSecret>, StoreError> {
		Ok(self.0.read().get(&key).cloned())
	}

	fn write(&self, key: CredentialKey, value: TokenSecret) -> Result<(), StoreError> {
		self.0.write().insert(key, value);

		Ok(())
	}

	fn clear(&self) -> Result<(), StoreError> {
		self.0.write().clear();

		Ok(())
	}

	fn replace(&self, pair: &CredentialPair) -> Result<(), StoreError> {
		self.0.write().extend(pair_entries(pair));

		Ok(())
	}
}
