//! Gateway configuration: the fixed backend origin plus the refresh and login entry points.

// self
use crate::{_prelude::*, error::ConfigError};

/// Immutable gateway configuration, fixed at construction time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayConfig {
	/// Origin every relative request path is resolved against.
	pub base_url: Url,
	/// Path of the refresh endpoint, relative to [`base_url`](Self::base_url).
	#[serde(default = "GatewayConfig::default_refresh_path")]
	pub refresh_path: String,
	/// Login entry point handed to the fatal-logout hook.
	#[serde(default = "GatewayConfig::default_login_path")]
	pub login_path: String,
}
impl GatewayConfig {
	/// Refresh endpoint exposed by the lab backend.
	pub const DEFAULT_REFRESH_PATH: &'static str = "/api/user/refresh-token";
	/// Login route the console navigates to after a fatal authorization failure.
	pub const DEFAULT_LOGIN_PATH: &'static str = "/login";

	/// Creates a new builder for the provided origin.
	pub fn builder(base_url: Url) -> GatewayConfigBuilder {
		GatewayConfigBuilder::new(base_url)
	}

	/// Parses a JSON document and validates the result.
	pub fn from_json(raw: &str) -> Result<Self> {
		let mut de = serde_json::Deserializer::from_str(raw);
		let parsed: Self = serde_path_to_error::deserialize(&mut de)
			.map_err(|source| Error::Decode { source })?;

		parsed.validate()?;

		Ok(parsed)
	}

	/// Resolves a request path (plus query pairs) against the base URL.
	///
	/// Absolute `http(s)://` paths are used verbatim. Relative paths are appended to the base
	/// URL's path rather than replacing it, so a base of `https://lab.example/v2` and a path of
	/// `/api/task` resolve to `https://lab.example/v2/api/task`.
	pub fn endpoint(&self, path: &str, query: &[(String, String)]) -> Result<Url, ConfigError> {
		let invalid = |source| ConfigError::InvalidPath { path: path.to_owned(), source };
		let mut url = if path.starts_with("http://") || path.starts_with("https://") {
			Url::parse(path).map_err(invalid)?
		} else {
			let base = self.base_url.as_str().trim_end_matches('/');
			let relative = path.trim_start_matches('/');

			Url::parse(&format!("{base}/{relative}")).map_err(invalid)?
		};

		if !query.is_empty() {
			url.query_pairs_mut().extend_pairs(query.iter().map(|(k, v)| (k.as_str(), v.as_str())));
		}

		Ok(url)
	}

	/// Resolves the refresh endpoint.
	pub fn refresh_endpoint(&self) -> Result<Url, ConfigError> {
		self.endpoint(&self.refresh_path, &[])
	}

	fn validate(&self) -> Result<(), ConfigError> {
		if !matches!(self.base_url.scheme(), "http" | "https") {
			return Err(ConfigError::UnsupportedScheme { url: self.base_url.to_string() });
		}
		if self.base_url.cannot_be_a_base() {
			return Err(ConfigError::CannotBeABase { url: self.base_url.to_string() });
		}
		if self.refresh_path.trim().is_empty() {
			return Err(ConfigError::EmptyPath { name: "refresh" });
		}
		if self.login_path.trim().is_empty() {
			return Err(ConfigError::EmptyPath { name: "login" });
		}

		Ok(())
	}

	fn default_refresh_path() -> String {
		Self::DEFAULT_REFRESH_PATH.into()
	}

	fn default_login_path() -> String {
		Self::DEFAULT_LOGIN_PATH.into()
	}
}

/// Builder for [`GatewayConfig`] values.
#[derive(Debug)]
pub struct GatewayConfigBuilder {
	/// Origin for every request.
	pub base_url: Url,
	/// Refresh endpoint path.
	pub refresh_path: String,
	/// Login entry point.
	pub login_path: String,
}
impl GatewayConfigBuilder {
	/// Creates a new builder seeded with the backend origin and default paths.
	pub fn new(base_url: Url) -> Self {
		Self {
			base_url,
			refresh_path: GatewayConfig::default_refresh_path(),
			login_path: GatewayConfig::default_login_path(),
		}
	}

	/// Overrides the refresh endpoint path.
	pub fn refresh_path(mut self, path: impl Into<String>) -> Self {
		self.refresh_path = path.into();

		self
	}

	/// Overrides the login entry point.
	pub fn login_path(mut self, path: impl Into<String>) -> Self {
		self.login_path = path.into();

		self
	}

	/// Validates the inputs and produces a [`GatewayConfig`].
	pub fn build(self) -> Result<GatewayConfig, ConfigError> {
		let config = GatewayConfig {
			base_url: self.base_url,
			refresh_path: self.refresh_path,
			login_path: self.login_path,
		};

		config.validate()?;

		Ok(config)
	}
}
