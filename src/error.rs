//! Gateway-level error types shared across the transport, store, and refresh layers.

// self
use crate::{_prelude::*, transport::RequestDescriptor};

/// Gateway-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

pub(crate) type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical gateway error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Storage-layer failure.
	#[error("{0}")]
	Storage(
		#[from]
		#[source]
		crate::store::StoreError,
	),
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Access-token renewal failed; every request waiting on it receives a clone.
	#[error(transparent)]
	Refresh(#[from] RefreshError),

	/// The transport could not produce a response (DNS, TCP, TLS, IO).
	#[error("Transport failed while sending {} {}.", .request.method, .request.path)]
	Transport {
		/// Request that was being dispatched.
		request: Box<RequestDescriptor>,
		/// Underlying transport failure.
		#[source]
		source: TransportError,
	},
	/// The backend answered with a non-success status.
	#[error("Request {} {} failed with HTTP status {status}.", .request.method, .request.path)]
	Status {
		/// HTTP status code returned by the backend.
		status: u16,
		/// Response body, decoded lossily as UTF-8.
		body: String,
		/// Request that produced the response.
		request: Box<RequestDescriptor>,
	},
	/// A successful response body could not be decoded into the requested type.
	#[error("Response body is not valid JSON for the requested type.")]
	Decode {
		/// Structured parsing failure with the JSON path that failed.
		#[source]
		source: serde_path_to_error::Error<serde_json::Error>,
	},
}
impl Error {
	/// Returns the HTTP status carried by the error, when one exists.
	pub fn status(&self) -> Option<u16> {
		match self {
			Self::Status { status, .. } => Some(*status),
			Self::Refresh(RefreshError::Rejected { status, .. }) => Some(*status),
			_ => None,
		}
	}

	/// Returns the request that failed, when the error originated from a dispatched request.
	pub fn request(&self) -> Option<&RequestDescriptor> {
		match self {
			Self::Status { request, .. } | Self::Transport { request, .. } => Some(request),
			_ => None,
		}
	}

	/// Whether the backend rejected the request with `401 Unauthorized`.
	pub fn is_unauthorized(&self) -> bool {
		matches!(self, Self::Status { status: 401, .. })
	}
}

/// Configuration and validation failures raised by the gateway.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// No transport was configured and the `reqwest` feature is disabled.
	#[error("Gateway requires an HTTP transport.")]
	MissingTransport,
	/// Base URL must use `http` or `https`.
	#[error("Base URL must use http or https: {url}.")]
	UnsupportedScheme {
		/// Offending URL.
		url: String,
	},
	/// Base URL cannot carry relative paths (e.g. `mailto:` or `data:` URLs).
	#[error("Base URL cannot be used as a base: {url}.")]
	CannotBeABase {
		/// Offending URL.
		url: String,
	},
	/// A configured path is empty.
	#[error("The {name} path must not be empty.")]
	EmptyPath {
		/// Which path failed validation.
		name: &'static str,
	},
	/// Request path could not be joined onto the base URL.
	#[error("Request path `{path}` does not form a valid URL.")]
	InvalidPath {
		/// Path that failed to parse.
		path: String,
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// Header name or value is not valid HTTP.
	#[error("Header `{name}` is invalid.")]
	InvalidHeader {
		/// Header name as supplied by the caller.
		name: String,
	},
	/// Request body could not be serialized to JSON.
	#[error("Request body could not be serialized to JSON.")]
	RequestBody(#[from] serde_json::Error),
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

/// Transport-level failures (network, IO).
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while calling the backend.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// Underlying IO failure surfaced during transport.
	#[error("I/O error occurred while calling the backend.")]
	Io(#[from] std::io::Error),
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Network { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for TransportError {
	fn from(e: ReqwestError) -> Self {
		Self::network(e)
	}
}

/// Access-token renewal failures.
///
/// The type is [`Clone`] because a single failed refresh rejects the leader and every queued
/// request with the same value.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum RefreshError {
	/// Refresh endpoint answered with a non-success status.
	#[error("Refresh endpoint rejected the refresh token with HTTP status {status}.")]
	Rejected {
		/// HTTP status code returned by the refresh endpoint.
		status: u16,
		/// Response body, decoded lossily as UTF-8.
		body: String,
	},
	/// Refresh request could not be assembled from the configuration.
	#[error("Refresh request could not be built: {message}.")]
	InvalidRequest {
		/// Rendered configuration failure.
		message: String,
	},
	/// Refresh call never produced a response.
	#[error("Refresh call failed in transport: {message}.")]
	Transport {
		/// Rendered transport failure.
		message: String,
	},
	/// Refresh endpoint answered 2xx with a body that is not a credential pair.
	#[error("Refresh endpoint returned a malformed credential pair: {message}.")]
	MalformedResponse {
		/// Rendered parsing failure, including the JSON path.
		message: String,
	},
	/// No refresh token is stored, so there is nothing to exchange.
	#[error("No refresh token is stored.")]
	MissingRefreshToken,
	/// Renewed credentials could not be persisted.
	#[error("Renewed credentials could not be persisted: {0}")]
	Storage(crate::store::StoreError),
	/// The request driving the refresh was dropped before the refresh settled.
	#[error("The in-flight refresh was abandoned before it settled.")]
	Abandoned,
}

#[cfg(test)]
mod tests {
	// crates.io
	use ::http::Method;
	// self
	use super::*;

	#[test]
	fn status_error_exposes_request_and_status() {
		let request = RequestDescriptor::new(Method::GET, "/api/task/list");
		let err = Error::Status { status: 401, body: String::new(), request: Box::new(request) };

		assert!(err.is_unauthorized());
		assert_eq!(err.status(), Some(401));
		assert_eq!(
			err.request().map(|request| request.path.as_str()),
			Some("/api/task/list"),
		);
		assert_eq!(err.to_string(), "Request GET /api/task/list failed with HTTP status 401.");
	}

	#[test]
	fn refresh_rejection_reports_status_but_is_not_unauthorized() {
		let err = Error::from(RefreshError::Rejected { status: 401, body: "expired".into() });

		assert_eq!(err.status(), Some(401));
		assert!(!err.is_unauthorized());
		assert!(err.request().is_none());
	}

	#[test]
	fn transport_error_keeps_source() {
		let io = std::io::Error::other("connection reset");
		let err = Error::Transport {
			request: Box::new(RequestDescriptor::new(Method::POST, "/api/culture/batch")),
			source: TransportError::Io(io),
		};
		let source = StdError::source(&err).expect("Transport errors should expose their source.");

		assert_eq!(source.to_string(), "I/O error occurred while calling the backend.");
	}
}
