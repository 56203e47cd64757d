//! Bearer-authenticated HTTP gateway that renews expired access tokens once, no matter how many
//! requests fail at the same time, and replays every affected request exactly once.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod auth;
pub mod config;
pub mod error;
pub mod gateway;
pub mod obs;
pub mod store;
pub mod transport;
#[cfg(any(test, feature = "test"))]
pub mod _preludet {
	//! Convenience re-exports and helpers for integration tests; enabled via `cfg(test)` or the
	//! `test` crate feature.

	pub use crate::_prelude::*;

	// self
	use crate::{
		auth::CredentialPair,
		config::GatewayConfig,
		gateway::{FatalAuthHandler, Gateway},
		store::{CredentialStore, MemoryStore},
		transport::{
			HttpResponse, HttpTransport, RequestDescriptor, TransportError, TransportFuture,
		},
	};
	#[cfg(feature = "reqwest")]
	use crate::transport::ReqwestTransport;

	/// Fatal-logout hook that records every login path it was asked to navigate to.
	#[derive(Clone, Debug, Default)]
	pub struct RecordingLogout(Arc<Mutex<Vec<String>>>);
	impl RecordingLogout {
		/// Returns how many times the hook fired.
		pub fn calls(&self) -> usize {
			self.0.lock().len()
		}

		/// Returns the recorded login paths in invocation order.
		pub fn paths(&self) -> Vec<String> {
			self.0.lock().clone()
		}
	}
	impl FatalAuthHandler for RecordingLogout {
		fn on_fatal_auth_failure(&self, login_path: &str) {
			self.0.lock().push(login_path.to_owned());
		}
	}

	/// Builds a memory store seeded with the provided access/refresh pair.
	pub fn seeded_store(access: &str, refresh: &str) -> Arc<MemoryStore> {
		let store = Arc::new(MemoryStore::default());

		store
			.replace(&CredentialPair::new(access, refresh))
			.expect("Memory store should accept the seeded credential pair.");

		store
	}

	/// Builds a gateway config rooted at `base`.
	pub fn test_config(base: &str) -> GatewayConfig {
		GatewayConfig::builder(Url::parse(base).expect("Test base URL should parse."))
			.build()
			.expect("Test gateway config should validate.")
	}

	/// Assembles a gateway over an arbitrary transport with a recording logout hook.
	pub fn build_test_gateway<T>(
		base: &str,
		store: Arc<MemoryStore>,
		transport: T,
	) -> (Gateway, RecordingLogout)
	where
		T: HttpTransport,
	{
		let logout = RecordingLogout::default();
		let store: Arc<dyn CredentialStore> = store;
		let gateway = Gateway::builder(test_config(base))
			.store(store)
			.transport(transport)
			.on_fatal_auth_failure(logout.clone())
			.build()
			.expect("Test gateway should build with an explicit transport.");

		(gateway, logout)
	}

	/// Builds a reqwest transport that accepts the self-signed certificates produced by
	/// `httpmock` during tests.
	#[cfg(feature = "reqwest")]
	pub fn test_reqwest_transport() -> ReqwestTransport {
		let client = ReqwestClient::builder()
			.danger_accept_invalid_certs(true)
			.danger_accept_invalid_hostnames(true)
			.build()
			.expect("Failed to build insecure Reqwest client for tests.");

		ReqwestTransport::with_client(client)
	}

	/// Constructs a reqwest-backed gateway pointed at `base` with a seeded memory store.
	#[cfg(feature = "reqwest")]
	pub fn build_reqwest_test_gateway(
		base: &str,
		access: &str,
		refresh: &str,
	) -> (Gateway, Arc<MemoryStore>, RecordingLogout) {
		let store = seeded_store(access, refresh);
		let (gateway, logout) = build_test_gateway(base, store.clone(), test_reqwest_transport());

		(gateway, store, logout)
	}

	/// Transport that answers every call with the same canned response; handy for unit tests.
	#[derive(Clone, Debug)]
	pub struct StaticTransport {
		status: u16,
		body: String,
		calls: Arc<Mutex<Vec<RequestDescriptor>>>,
	}
	impl StaticTransport {
		/// Creates a transport replying with `status` and `body`.
		pub fn new(status: u16, body: impl Into<String>) -> Self {
			Self { status, body: body.into(), calls: Default::default() }
		}

		/// Returns every request the transport received.
		pub fn calls(&self) -> Vec<RequestDescriptor> {
			self.calls.lock().clone()
		}
	}
	impl HttpTransport for StaticTransport {
		fn execute<'a>(
			&'a self,
			_url: Url,
			request: &'a RequestDescriptor,
		) -> TransportFuture<'a> {
			self.calls.lock().push(request.clone());

			let response = HttpResponse::from_parts(self.status, self.body.clone().into_bytes())
				.map_err(TransportError::network);

			Box::pin(async move { response })
		}
	}
}

mod _prelude {
	pub use std::{
		collections::BTreeMap,
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		sync::Arc,
	};

	pub use parking_lot::{Mutex, RwLock};
	#[cfg(feature = "reqwest")]
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::OffsetDateTime;
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

pub use http;
#[cfg(feature = "reqwest")] pub use reqwest;
pub use url;
#[cfg(test)] use {color_eyre as _, httpmock as _, tokio as _};
