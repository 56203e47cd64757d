//! Credential persistence contract and the built-in store implementations.

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

// self
use crate::{
	_prelude::*,
	auth::{CredentialKey, CredentialPair, TokenSecret},
};

/// Synchronous key-value store holding the active credential pair.
///
/// Every method runs to completion without suspending, so the gateway can consult the store in
/// the same critical section that decides whether a refresh is needed.
pub trait CredentialStore
where
	Self: Send + Sync,
{
	/// Reads the secret stored under `key`.
	fn read(&self, key: CredentialKey) -> Result<Option<TokenSecret>, StoreError>;

	/// Writes a single secret.
	fn write(&self, key: CredentialKey, value: TokenSecret) -> Result<(), StoreError>;

	/// Removes every persisted credential.
	fn clear(&self) -> Result<(), StoreError>;

	/// Overwrites both secrets so readers never observe a half-written pair.
	///
	/// The default implementation writes the keys one after another; backends that can hold a
	/// single lock across both writes should override it.
	fn replace(&self, pair: &CredentialPair) -> Result<(), StoreError> {
		for key in CredentialKey::ALL {
			self.write(key, pair.get(key).to_owned())?;
		}

		Ok(())
	}

	/// Loads the full pair when both secrets are present.
	fn load(&self) -> Result<Option<CredentialPair>, StoreError> {
		let access = self.read(CredentialKey::AccessToken)?;
		let refresh = self.read(CredentialKey::RefreshToken)?;

		Ok(access
			.zip(refresh)
			.map(|(access_token, refresh_token)| CredentialPair { access_token, refresh_token }))
	}
}

/// Error type produced by [`CredentialStore`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// Serialization failures surfaced by the backend.
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

pub(crate) type CredentialMap = BTreeMap<CredentialKey, TokenSecret>;

pub(crate) fn pair_entries(
	pair: &CredentialPair,
) -> impl Iterator<Item = (CredentialKey, TokenSecret)> {
	CredentialKey::ALL.into_iter().map(|key| (key, pair.get(key).to_owned()))
}
