//! The authenticated request gateway.
//!
//! [`Gateway::send`] runs every request through two interceptors. The outgoing one attaches the
//! stored access token as a bearer credential. The incoming one inspects failures: anything other
//! than a first-time `401` reaches the caller untouched, while a first-time `401` either joins the
//! refresh already in flight or starts one.

mod metrics;
mod refresh;

pub use metrics::RefreshMetrics;

// crates.io
use serde::de::DeserializeOwned;
// self
use crate::{
	_prelude::*,
	auth::{CredentialKey, CredentialPair},
	config::GatewayConfig,
	error::ConfigError,
	obs::{self, FlowKind, FlowOutcome, FlowSpan, GatewayEvent},
	store::{CredentialStore, MemoryStore},
	transport::{HttpResponse, HttpTransport, RequestDescriptor},
};
#[cfg(feature = "reqwest")] use crate::transport::ReqwestTransport;

/// Side effect run once credentials have been wiped after an unrecoverable refresh failure.
///
/// In the admin console this is a hard navigation to the login route; tests record the call.
/// Any `Fn(&str)` closure qualifies.
pub trait FatalAuthHandler
where
	Self: 'static + Send + Sync,
{
	/// Invoked exactly once per failed refresh, after the credential store was cleared.
	fn on_fatal_auth_failure(&self, login_path: &str);
}
impl<F> FatalAuthHandler for F
where
	F: 'static + Send + Sync + Fn(&str),
{
	fn on_fatal_auth_failure(&self, login_path: &str) {
		self(login_path)
	}
}

/// Handler that ignores fatal failures; the refresh error still reaches every caller.
#[derive(Clone, Copy, Debug, Default)]
pub struct IgnoreFatalAuth;
impl FatalAuthHandler for IgnoreFatalAuth {
	fn on_fatal_auth_failure(&self, _login_path: &str) {}
}

/// Bearer-authenticated HTTP client with single-flight token refresh.
///
/// Clones share the same store, transport, and refresh state. Separately built gateways never
/// share refresh state, even when they share a store.
#[derive(Clone)]
pub struct Gateway(Arc<GatewayInner>);
impl Gateway {
	/// Starts a builder for a gateway rooted at `config.base_url`.
	pub fn builder(config: GatewayConfig) -> GatewayBuilder {
		GatewayBuilder::new(config)
	}

	/// Creates a gateway over the default reqwest transport that never navigates on failure.
	#[cfg(feature = "reqwest")]
	pub fn new(config: GatewayConfig, store: Arc<dyn CredentialStore>) -> Self {
		let transport = Arc::new(ReqwestTransport::default());

		Self::from_parts(config, store, transport, Arc::new(IgnoreFatalAuth))
	}

	fn from_parts(
		config: GatewayConfig,
		store: Arc<dyn CredentialStore>,
		transport: Arc<dyn HttpTransport>,
		fatal_handler: Arc<dyn FatalAuthHandler>,
	) -> Self {
		Self(Arc::new(GatewayInner {
			config,
			store,
			transport,
			fatal_handler,
			metrics: Default::default(),
			state: Default::default(),
		}))
	}

	/// Sends `request` through both interceptors.
	///
	/// A `401` on a request that has not been replayed yet triggers (or joins) a refresh and the
	/// request is replayed once with the renewed credential. Every other failure is returned as is.
	pub async fn send(&self, request: RequestDescriptor) -> Result<HttpResponse> {
		const KIND: FlowKind = FlowKind::Dispatch;

		let span = FlowSpan::new(KIND, &request.method, &request.path);

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span
			.instrument(async move {
				match self.attempt(request).await {
					Err(err) => self.recover(err).await,
					ok => ok,
				}
			})
			.await;

		match &result {
			Ok(_) => obs::record_flow_outcome(KIND, FlowOutcome::Success),
			Err(_) => obs::record_flow_outcome(KIND, FlowOutcome::Failure),
		}

		result
	}

	/// Sends `request` and deserializes the JSON response body.
	pub async fn send_json<T>(&self, request: RequestDescriptor) -> Result<T>
	where
		T: DeserializeOwned,
	{
		self.send(request).await?.json()
	}

	/// Issues a `GET` request.
	pub async fn get(&self, path: impl Into<String>) -> Result<HttpResponse> {
		self.send(RequestDescriptor::get(path)).await
	}

	/// Issues a `DELETE` request.
	pub async fn delete(&self, path: impl Into<String>) -> Result<HttpResponse> {
		self.send(RequestDescriptor::delete(path)).await
	}

	/// Issues a `POST` request with a JSON body.
	pub async fn post_json<B>(&self, path: impl Into<String>, body: &B) -> Result<HttpResponse>
	where
		B: ?Sized + Serialize,
	{
		self.send(RequestDescriptor::post(path).json(body)?).await
	}

	/// Issues a `PUT` request with a JSON body.
	pub async fn put_json<B>(&self, path: impl Into<String>, body: &B) -> Result<HttpResponse>
	where
		B: ?Sized + Serialize,
	{
		self.send(RequestDescriptor::put(path).json(body)?).await
	}

	/// Stores the pair issued by an out-of-band sign-in.
	pub fn login(&self, pair: &CredentialPair) -> Result<()> {
		self.0.store.replace(pair)?;

		Ok(())
	}

	/// Clears stored credentials without invoking the fatal-logout hook.
	pub fn logout(&self) -> Result<()> {
		self.0.store.clear()?;

		Ok(())
	}

	/// Returns the stored pair when both secrets are present.
	pub fn credentials(&self) -> Result<Option<CredentialPair>> {
		Ok(self.0.store.load()?)
	}

	/// Whether a refresh call is currently in flight.
	pub fn is_refreshing(&self) -> bool {
		self.0.state.lock().refreshing
	}

	/// Number of requests waiting for the in-flight refresh to settle.
	pub fn pending_requests(&self) -> usize {
		self.0.state.lock().queue.len()
	}

	/// Refresh counters for this gateway.
	pub fn metrics(&self) -> &RefreshMetrics {
		&self.0.metrics
	}

	/// Configuration the gateway was built with.
	pub fn config(&self) -> &GatewayConfig {
		&self.0.config
	}

	/// Outgoing interceptor: attaches the stored access token, if any.
	///
	/// A missing token (or an unreadable store) leaves the request unauthenticated; the backend's
	/// `401` then takes the regular recovery path.
	fn authorize(&self, request: &mut RequestDescriptor) {
		match self.0.store.read(CredentialKey::AccessToken) {
			Ok(Some(token)) => request.set_bearer(&token),
			Ok(None) => {},
			Err(error) => obs::emit(GatewayEvent::StoreFailed { operation: "read", error: &error }),
		}
	}

	async fn attempt(&self, mut request: RequestDescriptor) -> Result<HttpResponse> {
		self.authorize(&mut request);
		self.dispatch(request).await
	}

	/// Hands the request to the transport and turns non-2xx statuses into [`Error::Status`].
	async fn dispatch(&self, request: RequestDescriptor) -> Result<HttpResponse> {
		let url = self.0.config.endpoint(&request.path, &request.query)?;
		let response = match self.0.transport.execute(url, &request).await {
			Ok(response) => response,
			Err(source) => return Err(Error::Transport { request: Box::new(request), source }),
		};

		if response.is_success() {
			Ok(response)
		} else {
			Err(Error::Status {
				status: response.status.as_u16(),
				body: response.text(),
				request: Box::new(request),
			})
		}
	}
}
impl Debug for Gateway {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Gateway")
			.field("config", &self.0.config)
			.field("refreshing", &self.is_refreshing())
			.field("pending_requests", &self.pending_requests())
			.finish()
	}
}

/// Builder for [`Gateway`] values.
pub struct GatewayBuilder {
	config: GatewayConfig,
	store: Option<Arc<dyn CredentialStore>>,
	transport: Option<Arc<dyn HttpTransport>>,
	fatal_handler: Option<Arc<dyn FatalAuthHandler>>,
}
impl GatewayBuilder {
	/// Creates a builder with no store, transport, or fatal-logout hook.
	pub fn new(config: GatewayConfig) -> Self {
		Self { config, store: None, transport: None, fatal_handler: None }
	}

	/// Uses `store` for credential persistence (defaults to a fresh [`MemoryStore`]).
	pub fn store(mut self, store: Arc<dyn CredentialStore>) -> Self {
		self.store = Some(store);

		self
	}

	/// Uses `transport` for every outgoing call (defaults to [`ReqwestTransport`] when the
	/// `reqwest` feature is enabled).
	pub fn transport<T>(mut self, transport: T) -> Self
	where
		T: HttpTransport,
	{
		self.transport = Some(Arc::new(transport));

		self
	}

	/// Registers the side effect run after an unrecoverable refresh failure.
	pub fn on_fatal_auth_failure<H>(mut self, handler: H) -> Self
	where
		H: FatalAuthHandler,
	{
		self.fatal_handler = Some(Arc::new(handler));

		self
	}

	/// Assembles the gateway.
	pub fn build(self) -> Result<Gateway, ConfigError> {
		let transport = match self.transport {
			Some(transport) => transport,
			#[cfg(feature = "reqwest")]
			None => Arc::new(ReqwestTransport::default()),
			#[cfg(not(feature = "reqwest"))]
			None => return Err(ConfigError::MissingTransport),
		};
		let store = self.store.unwrap_or_else(|| Arc::new(MemoryStore::default()));
		let fatal_handler = self.fatal_handler.unwrap_or_else(|| Arc::new(IgnoreFatalAuth));

		Ok(Gateway::from_parts(self.config, store, transport, fatal_handler))
	}
}
impl Debug for GatewayBuilder {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("GatewayBuilder")
			.field("config", &self.config)
			.field("store_set", &self.store.is_some())
			.field("transport_set", &self.transport.is_some())
			.field("fatal_handler_set", &self.fatal_handler.is_some())
			.finish()
	}
}

struct GatewayInner {
	config: GatewayConfig,
	store: Arc<dyn CredentialStore>,
	transport: Arc<dyn HttpTransport>,
	fatal_handler: Arc<dyn FatalAuthHandler>,
	metrics: RefreshMetrics,
	state: Mutex<refresh::RefreshState>,
}
