//! Incoming interceptor and single-flight refresh coordination.
//!
//! The first request to fail with a first-time `401` becomes the leader: it flips the
//! refresh flag and calls the refresh endpoint. Requests that fail while the flag is set become
//! followers and park a [`PendingRequest`] in the queue. When the refresh settles, the leader
//! drains the queue in one pass. On success every follower receives its own request with the
//! new bearer attached and re-issues it. On failure every follower receives the same
//! [`RefreshError`]. The flag flip and the queue drain happen under the same lock, so the queue
//! is never observed non-empty while the flag is clear.

// std
use std::mem;
// crates.io
use futures::channel::oneshot;
use http::Method;
// self
use crate::{
	_prelude::*,
	auth::{CredentialKey, CredentialPair, RefreshRequestBody, TokenSecret},
	error::RefreshError,
	gateway::Gateway,
	obs::{self, FlowKind, FlowOutcome, FlowSpan, GatewayEvent},
	transport::{HttpResponse, RequestDescriptor},
};

/// What a follower receives once the refresh settles: its request, re-authorized, or the
/// failure that ended the cycle.
type Settlement = Result<RequestDescriptor, RefreshError>;

/// Refresh flag plus the followers waiting on it.
#[derive(Debug, Default)]
pub(crate) struct RefreshState {
	pub(crate) refreshing: bool,
	pub(crate) queue: Vec<PendingRequest>,
}

/// A request parked behind the in-flight refresh.
#[derive(Debug)]
pub(crate) struct PendingRequest {
	original_request: RequestDescriptor,
	settle: oneshot::Sender<Settlement>,
}

/// How a request that failed with a first-time `401` proceeds.
enum Turn {
	/// Wait for the refresh already in flight.
	Follow(oneshot::Receiver<Settlement>),
	/// The stored credential changed since dispatch; replay with it directly.
	Replay(RequestDescriptor),
	/// Start the refresh.
	Lead(RequestDescriptor),
	/// A failed refresh wiped the credential this request carried; nothing is left to renew.
	Expired(RequestDescriptor),
}

impl Gateway {
	/// Incoming interceptor.
	pub(super) async fn recover(&self, error: Error) -> Result<HttpResponse> {
		let (mut request, body) = match error {
			Error::Status { status: 401, request, body } if !request.is_retried() => (*request, body),
			other => return Err(other),
		};

		// Marked before any suspension so the same request can never be queued twice.
		request.mark_retried();

		match self.take_turn(request) {
			Turn::Follow(settled) => {
				let request = match settled.await {
					Ok(Ok(request)) => request,
					Ok(Err(error)) => return Err(error.into()),
					// The leader was dropped together with its guard's sender.
					Err(oneshot::Canceled) => return Err(RefreshError::Abandoned.into()),
				};

				self.replay(request).await
			},
			Turn::Replay(request) => self.replay(request).await,
			Turn::Lead(request) => self.lead_refresh(request).await,
			Turn::Expired(request) => Err(Error::Status { status: 401, body, request: Box::new(request) }),
		}
	}

	/// Decides, inside one critical section, whether this request follows, replays, or leads.
	fn take_turn(&self, mut request: RequestDescriptor) -> Turn {
		let mut state = self.0.state.lock();

		if state.refreshing {
			let (settle, settled) = oneshot::channel();

			obs::emit(GatewayEvent::Queued { path: &request.path, pending: state.queue.len() + 1 });
			state.queue.push(PendingRequest { original_request: request, settle });
			self.0.metrics.record_queued();

			return Turn::Follow(settled);
		}

		// Only a request that carried a credential can tell whether the store moved on since it
		// was dispatched.
		if let Some(sent) = request.bearer_token().map(str::to_owned) {
			match self.0.store.read(CredentialKey::AccessToken) {
				Ok(Some(current)) if current.expose() != sent => {
					obs::emit(GatewayEvent::StaleCredential { path: &request.path });
					self.0.metrics.record_stale_replay();
					request.set_bearer(&current);

					return Turn::Replay(request);
				},
				Ok(Some(_)) => {},
				Ok(None) => {
					obs::emit(GatewayEvent::SessionExpired { path: &request.path });

					return Turn::Expired(request);
				},
				Err(error) =>
					obs::emit(GatewayEvent::StoreFailed { operation: "read", error: &error }),
			}
		}

		state.refreshing = true;
		obs::emit(GatewayEvent::RefreshStarted { path: &request.path });

		Turn::Lead(request)
	}

	async fn lead_refresh(&self, mut request: RequestDescriptor) -> Result<HttpResponse> {
		let cycle = RefreshCycle { gateway: self, settled: false };

		match self.refresh_credentials().await {
			Ok(pair) => {
				let released = cycle.settle(Ok(&pair.access_token));

				obs::emit(GatewayEvent::RefreshSucceeded { released });
				request.set_bearer(&pair.access_token);

				self.replay(request).await
			},
			Err(error) => {
				// Wiped while the flag is still set, so a late 401 never leads a refresh with the
				// rejected credentials.
				self.clear_credentials();

				let rejected = cycle.settle(Err(&error));

				obs::emit(GatewayEvent::RefreshFailed { rejected, error: &error });
				self.force_logout();

				Err(error.into())
			},
		}
	}

	/// Calls the refresh endpoint and persists the renewed pair before returning it.
	async fn refresh_credentials(&self) -> Result<CredentialPair, RefreshError> {
		const KIND: FlowKind = FlowKind::Refresh;

		let span = FlowSpan::new(KIND, &Method::POST, &self.0.config.refresh_path);

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);
		self.0.metrics.record_attempt();

		let result = span.instrument(self.exchange_refresh_token()).await;

		match &result {
			Ok(_) => {
				self.0.metrics.record_success();
				obs::record_flow_outcome(KIND, FlowOutcome::Success);
			},
			Err(_) => {
				self.0.metrics.record_failure();
				obs::record_flow_outcome(KIND, FlowOutcome::Failure);
			},
		}

		result
	}

	async fn exchange_refresh_token(&self) -> Result<CredentialPair, RefreshError> {
		let refresh_token = self
			.0
			.store
			.read(CredentialKey::RefreshToken)
			.map_err(RefreshError::Storage)?
			.ok_or(RefreshError::MissingRefreshToken)?;
		let url = self.0.config.refresh_endpoint().map_err(invalid_request)?;
		let request = RequestDescriptor::post(self.0.config.refresh_path.as_str())
			.json(&RefreshRequestBody { refresh_token: refresh_token.expose() })
			.map_err(invalid_request)?;
		// Straight to the transport: the refresh call carries no bearer and is never intercepted.
		let response = self
			.0
			.transport
			.execute(url, &request)
			.await
			.map_err(|e| RefreshError::Transport { message: render_chain(&e) })?;

		if !response.is_success() {
			return Err(RefreshError::Rejected {
				status: response.status.as_u16(),
				body: response.text(),
			});
		}

		let mut de = serde_json::Deserializer::from_slice(&response.body);
		let pair: CredentialPair = serde_path_to_error::deserialize(&mut de)
			.map_err(|e| RefreshError::MalformedResponse { message: e.to_string() })?;

		self.0.store.replace(&pair).map_err(RefreshError::Storage)?;

		Ok(pair)
	}

	/// Re-issues a request that already consumed its single retry.
	///
	/// The outgoing interceptor runs again, but the incoming one does not: a second `401`
	/// reaches the caller unchanged.
	async fn replay(&self, request: RequestDescriptor) -> Result<HttpResponse> {
		const KIND: FlowKind = FlowKind::Replay;

		let span = FlowSpan::new(KIND, &request.method, &request.path);

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);
		self.0.metrics.record_replay();

		let result = span.instrument(self.attempt(request)).await;

		match &result {
			Ok(_) => obs::record_flow_outcome(KIND, FlowOutcome::Success),
			Err(_) => obs::record_flow_outcome(KIND, FlowOutcome::Failure),
		}

		result
	}

	/// Clears the refresh flag and hands every queued follower its settlement.
	///
	/// Returns how many followers were settled.
	fn settle_queue(&self, outcome: Result<&TokenSecret, &RefreshError>) -> usize {
		let pending = {
			let mut state = self.0.state.lock();

			state.refreshing = false;

			mem::take(&mut state.queue)
		};
		let settled = pending.len();

		for PendingRequest { mut original_request, settle } in pending {
			let settlement = match outcome {
				Ok(token) => {
					original_request.set_bearer(token);

					Ok(original_request)
				},
				Err(error) => Err(error.to_owned()),
			};

			// A follower whose future was dropped no longer listens; nothing else to do.
			let _ = settle.send(settlement);
		}

		settled
	}

	fn clear_credentials(&self) {
		if let Err(error) = self.0.store.clear() {
			obs::emit(GatewayEvent::StoreFailed { operation: "clear", error: &error });
		}
	}

	/// Fires the fatal-logout hook with the configured login path.
	fn force_logout(&self) {
		let login_path = self.0.config.login_path.as_str();

		obs::emit(GatewayEvent::FatalLogout { login_path });
		self.0.fatal_handler.on_fatal_auth_failure(login_path);
	}
}

/// Owns the refresh flag for the duration of one refresh call.
///
/// If the leader's future is dropped mid-refresh, the guard clears the flag and rejects every
/// follower with [`RefreshError::Abandoned`] so no caller waits forever.
struct RefreshCycle<'a> {
	gateway: &'a Gateway,
	settled: bool,
}
impl RefreshCycle<'_> {
	fn settle(mut self, outcome: Result<&TokenSecret, &RefreshError>) -> usize {
		self.settled = true;

		self.gateway.settle_queue(outcome)
	}
}
impl Drop for RefreshCycle<'_> {
	fn drop(&mut self) {
		if !self.settled {
			self.gateway.settle_queue(Err(&RefreshError::Abandoned));
		}
	}
}

fn invalid_request(error: impl Display) -> RefreshError {
	RefreshError::InvalidRequest { message: error.to_string() }
}

fn render_chain(error: &dyn StdError) -> String {
	let mut rendered = error.to_string();
	let mut source = error.source();

	while let Some(cause) = source {
		rendered.push_str(": ");
		rendered.push_str(&cause.to_string());

		source = cause.source();
	}

	rendered
}
