//! Transport primitives: request descriptors, buffered responses, and the pluggable HTTP client.
//!
//! [`HttpTransport`] is the gateway's only dependency on an HTTP stack. Implementations resolve
//! to an [`HttpResponse`] for every status code the backend returns and reserve
//! [`TransportError`] for failures that produced no response at all; the gateway classifies
//! statuses itself.

pub use crate::error::TransportError;

// crates.io
use http::{
	HeaderMap, HeaderName, HeaderValue, Method, StatusCode,
	header::{AUTHORIZATION, CONTENT_TYPE},
};
// self
use crate::{_prelude::*, auth::TokenSecret, error::ConfigError};

/// Boxed future returned by [`HttpTransport::execute`].
pub type TransportFuture<'a> =
	Pin<Box<dyn Future<Output = Result<HttpResponse, TransportError>> + 'a + Send>>;

/// Abstraction over HTTP clients capable of executing gateway requests.
///
/// Implementations must be `Send + Sync + 'static` so a single transport can be shared by every
/// clone of a gateway, and the futures they return must be `Send` so callers can spawn gateway
/// calls on multi-threaded executors.
pub trait HttpTransport
where
	Self: 'static + Send + Sync,
{
	/// Issues `request` against the fully resolved `url` (query string included).
	fn execute<'a>(&'a self, url: Url, request: &'a RequestDescriptor) -> TransportFuture<'a>;
}

/// Outgoing request as seen by the interceptors.
#[derive(Clone, Debug)]
pub struct RequestDescriptor {
	/// HTTP method.
	pub method: Method,
	/// Path relative to the gateway's base URL, or an absolute `http(s)://` URL.
	pub path: String,
	/// Query parameters appended to the resolved URL.
	pub query: Vec<(String, String)>,
	/// Request headers; the outgoing interceptor writes `Authorization` here.
	pub headers: HeaderMap,
	/// Raw request body.
	pub body: Option<Vec<u8>>,
	retried: bool,
}
impl RequestDescriptor {
	/// Creates a bodyless request.
	pub fn new(method: Method, path: impl Into<String>) -> Self {
		Self {
			method,
			path: path.into(),
			query: Vec::new(),
			headers: HeaderMap::new(),
			body: None,
			retried: false,
		}
	}

	/// Shorthand for a `GET` request.
	pub fn get(path: impl Into<String>) -> Self {
		Self::new(Method::GET, path)
	}

	/// Shorthand for a `POST` request.
	pub fn post(path: impl Into<String>) -> Self {
		Self::new(Method::POST, path)
	}

	/// Shorthand for a `PUT` request.
	pub fn put(path: impl Into<String>) -> Self {
		Self::new(Method::PUT, path)
	}

	/// Shorthand for a `DELETE` request.
	pub fn delete(path: impl Into<String>) -> Self {
		Self::new(Method::DELETE, path)
	}

	/// Appends a query parameter.
	pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.query.push((key.into(), value.into()));

		self
	}

	/// Sets a header, replacing any previous value.
	pub fn header(mut self, name: &str, value: &str) -> Result<Self, ConfigError> {
		let invalid = || ConfigError::InvalidHeader { name: name.to_owned() };
		let name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| invalid())?;
		let value = HeaderValue::from_str(value).map_err(|_| invalid())?;

		self.headers.insert(name, value);

		Ok(self)
	}

	/// Attaches a raw body.
	pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
		self.body = Some(body.into());

		self
	}

	/// Serializes `payload` as the JSON body and sets `Content-Type: application/json`.
	pub fn json<T>(mut self, payload: &T) -> Result<Self, ConfigError>
	where
		T: ?Sized + Serialize,
	{
		self.body = Some(serde_json::to_vec(payload)?);
		self.headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

		Ok(self)
	}

	/// Whether this request has already been replayed after an authorization failure.
	pub fn is_retried(&self) -> bool {
		self.retried
	}

	/// Returns the bearer token currently attached, if any.
	pub fn bearer_token(&self) -> Option<&str> {
		self.headers.get(AUTHORIZATION)?.to_str().ok()?.strip_prefix("Bearer ")
	}

	pub(crate) fn mark_retried(&mut self) {
		self.retried = true;
	}

	/// Writes `Authorization: Bearer <token>`, replacing any previous credential.
	pub(crate) fn set_bearer(&mut self, token: &TokenSecret) {
		match HeaderValue::from_str(&token.bearer()) {
			Ok(mut value) => {
				value.set_sensitive(true);
				self.headers.insert(AUTHORIZATION, value);
			},
			// A token with control characters cannot travel in a header; the request proceeds
			// unauthenticated and surfaces as a 401.
			Err(_) => {
				self.headers.remove(AUTHORIZATION);
			},
		}
	}
}

/// Fully buffered HTTP response.
#[derive(Clone, Debug)]
pub struct HttpResponse {
	/// Status returned by the backend.
	pub status: StatusCode,
	/// Response headers.
	pub headers: HeaderMap,
	/// Response body bytes.
	pub body: Vec<u8>,
}
impl HttpResponse {
	/// Builds a response from a raw status code and body.
	pub fn from_parts(
		status: u16,
		body: impl Into<Vec<u8>>,
	) -> Result<Self, http::status::InvalidStatusCode> {
		Ok(Self { status: StatusCode::from_u16(status)?, headers: HeaderMap::new(), body: body.into() })
	}

	/// Whether the status is in the `2xx` range.
	pub fn is_success(&self) -> bool {
		self.status.is_success()
	}

	/// Returns the body decoded lossily as UTF-8.
	pub fn text(&self) -> String {
		String::from_utf8_lossy(&self.body).into_owned()
	}

	/// Deserializes the body as JSON, reporting the failing path on error.
	pub fn json<T>(&self) -> Result<T>
	where
		T: serde::de::DeserializeOwned,
	{
		let mut de = serde_json::Deserializer::from_slice(&self.body);

		serde_path_to_error::deserialize(&mut de).map_err(|source| Error::Decode { source })
	}
}

/// Thin wrapper around [`ReqwestClient`] so shared HTTP behavior lives in one place.
#[cfg(feature = "reqwest")]
#[derive(Clone, Debug, Default)]
pub struct ReqwestTransport(pub ReqwestClient);
#[cfg(feature = "reqwest")]
impl ReqwestTransport {
	/// Wraps an existing reqwest [`ReqwestClient`].
	pub fn with_client(client: ReqwestClient) -> Self {
		Self(client)
	}

	/// Builds a client that aborts requests exceeding `timeout`.
	pub fn with_timeout(timeout: std::time::Duration) -> Result<Self, ConfigError> {
		Ok(Self(ReqwestClient::builder().timeout(timeout).build()?))
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
	fn execute<'a>(&'a self, url: Url, request: &'a RequestDescriptor) -> TransportFuture<'a> {
		Box::pin(async move {
			let mut builder =
				self.0.request(request.method.clone(), url).headers(request.headers.clone());

			if let Some(body) = &request.body {
				builder = builder.body(body.clone());
			}

			let response = builder.send().await?;
			let status = response.status();
			let headers = response.headers().to_owned();
			let body = response.bytes().await?.to_vec();

			Ok(HttpResponse { status, headers, body })
		})
	}
}
