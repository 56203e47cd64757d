// crates.io
use http::Method;
// self
use crate::{_prelude::*, obs::FlowKind};

/// Type alias that resolves to an instrumented future when tracing is enabled.
#[cfg(feature = "tracing")]
pub type InstrumentedFlow<F> = tracing::instrument::Instrumented<F>;
/// Passthrough future type when tracing is disabled.
#[cfg(not(feature = "tracing"))]
pub type InstrumentedFlow<F> = F;

/// A span builder used by gateway flows.
#[derive(Clone, Debug)]
pub struct FlowSpan {
	#[cfg(feature = "tracing")]
	span: tracing::Span,
}
impl FlowSpan {
	/// Creates a new span tagged with the flow kind and the request line.
	pub fn new(kind: FlowKind, method: &Method, path: &str) -> Self {
		#[cfg(feature = "tracing")]
		{
			let span = tracing::info_span!(
				"auth_gateway.flow",
				flow = kind.as_str(),
				method = method.as_str(),
				path
			);

			Self { span }
		}
		#[cfg(not(feature = "tracing"))]
		{
			let _ = (kind, method, path);

			Self {}
		}
	}

	/// Instruments an async block without holding a guard across `.await` points.
	pub fn instrument<Fut>(&self, fut: Fut) -> InstrumentedFlow<Fut>
	where
		Fut: Future,
	{
		#[cfg(feature = "tracing")]
		{
			use tracing::Instrument;

			fut.instrument(self.span.clone())
		}
		#[cfg(not(feature = "tracing"))]
		{
			fut
		}
	}
}

/// Discrete state transitions of the refresh coordinator.
#[derive(Debug)]
pub enum GatewayEvent<'a> {
	/// A 401 arrived while a refresh was in flight; the request joined the queue.
	Queued {
		/// Path of the queued request.
		path: &'a str,
		/// Queue length after enqueueing.
		pending: usize,
	},
	/// A 401 started a new refresh cycle.
	RefreshStarted {
		/// Path of the request that triggered the refresh.
		path: &'a str,
	},
	/// The refresh succeeded and queued requests were released for replay.
	RefreshSucceeded {
		/// Number of queued requests released.
		released: usize,
	},
	/// The refresh failed and queued requests were rejected.
	RefreshFailed {
		/// Number of queued requests rejected.
		rejected: usize,
		/// Failure that ended the cycle.
		error: &'a crate::error::RefreshError,
	},
	/// A 401 carried a credential that a completed refresh already replaced.
	StaleCredential {
		/// Path of the request replayed with the current credential.
		path: &'a str,
	},
	/// A 401 arrived after a failed refresh wiped the credential it carried.
	SessionExpired {
		/// Path of the request returned to its caller.
		path: &'a str,
	},
	/// Credentials were wiped and the fatal-logout hook is about to fire.
	FatalLogout {
		/// Login entry point handed to the hook.
		login_path: &'a str,
	},
	/// The credential store failed; the gateway carries on without it.
	StoreFailed {
		/// Operation that failed.
		operation: &'static str,
		/// Failure reported by the store.
		error: &'a crate::store::StoreError,
	},
}

/// Emits `event` through `tracing` (when enabled).
pub fn emit(event: GatewayEvent<'_>) {
	#[cfg(feature = "tracing")]
	match event {
		GatewayEvent::Queued { path, pending } =>
			tracing::debug!(path, pending, "request queued behind in-flight refresh"),
		GatewayEvent::RefreshStarted { path } =>
			tracing::debug!(path, "access token rejected, refreshing"),
		GatewayEvent::RefreshSucceeded { released } =>
			tracing::debug!(released, "access token refreshed"),
		GatewayEvent::RefreshFailed { rejected, error } =>
			tracing::warn!(rejected, error = %error, "access token refresh failed"),
		GatewayEvent::StaleCredential { path } =>
			tracing::debug!(path, "credential already renewed, replaying"),
		GatewayEvent::SessionExpired { path } =>
			tracing::debug!(path, "credentials already wiped, surfacing 401"),
		GatewayEvent::FatalLogout { login_path } =>
			tracing::warn!(login_path, "credentials cleared, forcing re-authentication"),
		GatewayEvent::StoreFailed { operation, error } =>
			tracing::warn!(operation, error = %error, "credential store failure"),
	}
	#[cfg(not(feature = "tracing"))]
	{
		let _ = event;
	}
}
