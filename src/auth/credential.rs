//! The access/refresh credential pair and the keys it is persisted under.

// self
use crate::{_prelude::*, auth::TokenSecret};

/// Keys under which the credential store persists secrets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CredentialKey {
	/// Short-lived bearer credential attached to every request.
	#[serde(rename = "accessToken")]
	AccessToken,
	/// Long-lived credential exchanged for a new pair.
	#[serde(rename = "refreshToken")]
	RefreshToken,
}
impl CredentialKey {
	/// Every persisted key, in a stable order.
	pub const ALL: [Self; 2] = [Self::AccessToken, Self::RefreshToken];

	/// Returns the storage key string.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::AccessToken => "accessToken",
			Self::RefreshToken => "refreshToken",
		}
	}
}
impl Display for CredentialKey {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// The single active access/refresh pair.
///
/// The serialized form matches the refresh endpoint's response body:
/// `{ "accessToken": "...", "refreshToken": "..." }`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialPair {
	/// Bearer credential attached to outgoing requests.
	pub access_token: TokenSecret,
	/// Credential exchanged at the refresh endpoint.
	pub refresh_token: TokenSecret,
}
impl CredentialPair {
	/// Creates a pair from raw token strings.
	pub fn new(access: impl Into<String>, refresh: impl Into<String>) -> Self {
		Self { access_token: TokenSecret::new(access), refresh_token: TokenSecret::new(refresh) }
	}

	/// Returns the secret stored under `key`.
	pub fn get(&self, key: CredentialKey) -> &TokenSecret {
		match key {
			CredentialKey::AccessToken => &self.access_token,
			CredentialKey::RefreshToken => &self.refresh_token,
		}
	}
}

/// Request body sent to the refresh endpoint.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RefreshRequestBody<'a> {
	pub(crate) refresh_token: &'a str,
}
