// std
use std::{collections::HashSet, time::Duration as StdDuration};
// crates.io
use tokio::{sync::Semaphore, task::JoinHandle};
// self
use auth_gateway::{
	_preludet::*,
	auth::{CredentialKey, CredentialPair},
	error::RefreshError,
	gateway::Gateway,
	store::CredentialStore,
	transport::{HttpResponse, HttpTransport, RequestDescriptor, TransportFuture},
};

const BASE: &str = "https://lab.example";
const REFRESH_PATH: &str = "/api/user/refresh-token";
const RENEWED: &str = "{\"accessToken\":\"A2\",\"refreshToken\":\"R2\"}";

/// In-process backend that accepts exactly one bearer token and lets the test decide when the
/// refresh endpoint answers.
#[derive(Clone)]
struct ScriptedBackend(Arc<BackendState>);
struct BackendState {
	accepted: String,
	refresh_status: u16,
	refresh_body: String,
	refresh_gate: Semaphore,
	slow_gate: Semaphore,
	always_unauthorized: HashSet<String>,
	slow_paths: HashSet<String>,
	refresh_calls: Mutex<Vec<(String, Option<String>)>>,
	requests: Mutex<Vec<(String, Option<String>)>>,
}
impl ScriptedBackend {
	fn new(accepted: &str, refresh_status: u16, refresh_body: &str) -> Self {
		Self(Arc::new(BackendState {
			accepted: accepted.into(),
			refresh_status,
			refresh_body: refresh_body.into(),
			refresh_gate: Semaphore::new(0),
			slow_gate: Semaphore::new(0),
			always_unauthorized: HashSet::new(),
			slow_paths: HashSet::new(),
			refresh_calls: Default::default(),
			requests: Default::default(),
		}))
	}

	fn always_unauthorized(self, path: &str) -> Self {
		self.configure(|state| {
			state.always_unauthorized.insert(path.into());
		})
	}

	fn slow(self, path: &str) -> Self {
		self.configure(|state| {
			state.slow_paths.insert(path.into());
		})
	}

	fn configure(self, apply: impl FnOnce(&mut BackendState)) -> Self {
		let mut state = Arc::into_inner(self.0).expect("Backend should not be shared while configured.");

		apply(&mut state);

		Self(Arc::new(state))
	}

	fn open_refresh(self) -> Self {
		self.release_refresh(Semaphore::MAX_PERMITS / 2);

		self
	}

	fn release_refresh(&self, permits: usize) {
		self.0.refresh_gate.add_permits(permits);
	}

	fn release_slow(&self) {
		self.0.slow_gate.add_permits(1);
	}

	fn refresh_calls(&self) -> Vec<(String, Option<String>)> {
		self.0.refresh_calls.lock().clone()
	}

	fn requests(&self) -> Vec<(String, Option<String>)> {
		self.0.requests.lock().clone()
	}

	fn requests_for(&self, path: &str) -> Vec<Option<String>> {
		self.requests().into_iter().filter(|(p, _)| p == path).map(|(_, bearer)| bearer).collect()
	}
}
impl HttpTransport for ScriptedBackend {
	fn execute<'a>(&'a self, url: Url, request: &'a RequestDescriptor) -> TransportFuture<'a> {
		Box::pin(async move {
			let state = &self.0;
			let path = url.path().to_owned();
			let bearer = request.bearer_token().map(str::to_owned);

			if path == REFRESH_PATH {
				let body = String::from_utf8(request.body.clone().unwrap_or_default())
					.expect("Refresh body should be UTF-8.");

				state.refresh_calls.lock().push((body, bearer));
				state.refresh_gate.acquire().await.expect("Refresh gate should stay open.").forget();

				return Ok(HttpResponse::from_parts(state.refresh_status, state.refresh_body.clone())
					.expect("Scripted refresh status should be valid."));
			}

			state.requests.lock().push((path.clone(), bearer.clone()));

			// Only the first attempt is held back; replays go straight through.
			if state.slow_paths.contains(&path) && !request.is_retried() {
				tokio::time::timeout(StdDuration::from_secs(5), state.slow_gate.acquire())
					.await
					.expect("Slow request should be released within the timeout.")
					.expect("Slow gate should stay open.")
					.forget();
			} else {
				tokio::task::yield_now().await;
			}

			let authorized = !state.always_unauthorized.contains(&path)
				&& bearer.as_deref() == Some(state.accepted.as_str());
			let (status, body) =
				if authorized { (200, format!("{{\"path\":\"{path}\"}}")) } else { (401, String::new()) };

			Ok(HttpResponse::from_parts(status, body).expect("Scripted status should be valid."))
		})
	}
}

async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
	tokio::time::timeout(StdDuration::from_secs(5), async {
		while !condition() {
			tokio::time::sleep(StdDuration::from_millis(2)).await;
		}
	})
	.await
	.unwrap_or_else(|_| panic!("Timed out waiting until {what}."));
}

fn spawn_get(gateway: &Gateway, path: &'static str) -> JoinHandle<Result<HttpResponse>> {
	let gateway = gateway.clone();

	tokio::spawn(async move { gateway.get(path).await })
}

const PATHS: [&str; 3] = ["/api/task/list", "/api/experiment/log", "/api/culture/batch"];

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_unauthorized_requests_share_one_refresh() {
	let backend = ScriptedBackend::new("A2", 200, RENEWED);
	let store = seeded_store("A1", "R1");
	let (gateway, logout) = build_test_gateway(BASE, store.clone(), backend.clone());
	let handles: Vec<_> = PATHS.into_iter().map(|path| spawn_get(&gateway, path)).collect();

	wait_until("two followers are queued behind the refresh call", || {
		gateway.pending_requests() == 2 && !backend.refresh_calls().is_empty()
	})
	.await;

	assert!(gateway.is_refreshing());
	assert_eq!(backend.refresh_calls(), vec![("{\"refreshToken\":\"R1\"}".to_owned(), None)]);

	backend.release_refresh(1);

	for (handle, path) in handles.into_iter().zip(PATHS) {
		let response = handle
			.await
			.expect("Request task should not panic.")
			.expect("Request should succeed after the refresh.");

		assert_eq!(response.status, 200);
		assert_eq!(response.text(), format!("{{\"path\":\"{path}\"}}"));
		assert_eq!(
			backend.requests_for(path),
			vec![Some("A1".to_owned()), Some("A2".to_owned())],
			"{path} should be sent once with the old token and replayed once with the new one.",
		);
	}

	assert_eq!(backend.refresh_calls().len(), 1);
	assert_eq!(store.load().expect("Store should load."), Some(CredentialPair::new("A2", "R2")));
	assert!(!gateway.is_refreshing());
	assert_eq!(gateway.pending_requests(), 0);
	assert_eq!(logout.calls(), 0);

	let metrics = gateway.metrics();

	assert_eq!(metrics.attempts(), 1);
	assert_eq!(metrics.successes(), 1);
	assert_eq!(metrics.queued(), 2);
	assert_eq!(metrics.replays(), 3);
	assert!(metrics.last_success_at().is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failed_refresh_rejects_every_waiter_and_logs_out_once() {
	let backend = ScriptedBackend::new("A2", 400, "{\"message\":\"refresh token expired\"}");
	let store = seeded_store("A1", "R1");
	let (gateway, logout) = build_test_gateway(BASE, store.clone(), backend.clone());
	let handles: Vec<_> = PATHS.into_iter().map(|path| spawn_get(&gateway, path)).collect();

	wait_until("two followers are queued", || gateway.pending_requests() == 2).await;
	backend.release_refresh(1);

	for handle in handles {
		let err = handle
			.await
			.expect("Request task should not panic.")
			.expect_err("Every caller should see the refresh failure.");

		match err {
			Error::Refresh(RefreshError::Rejected { status, body }) => {
				assert_eq!(status, 400);
				assert!(body.contains("refresh token expired"));
			},
			other => panic!("Unexpected error: {other:?}"),
		}
	}

	assert_eq!(store.read(CredentialKey::AccessToken).expect("Read should succeed."), None);
	assert_eq!(store.read(CredentialKey::RefreshToken).expect("Read should succeed."), None);
	assert_eq!(logout.paths(), vec!["/login".to_owned()]);
	assert_eq!(backend.refresh_calls().len(), 1);
	assert_eq!(backend.requests().len(), 3, "Nothing is replayed after a failed refresh.");
	assert!(!gateway.is_refreshing());
	assert_eq!(gateway.pending_requests(), 0);
	assert_eq!(gateway.metrics().failures(), 1);
}

#[tokio::test]
async fn second_unauthorized_after_replay_surfaces_without_new_refresh() {
	let backend =
		ScriptedBackend::new("A2", 200, RENEWED).always_unauthorized("/api/admin/roles").open_refresh();
	let store = seeded_store("A1", "R1");
	let (gateway, logout) = build_test_gateway(BASE, store.clone(), backend.clone());
	let err = gateway.get("/api/admin/roles").await.expect_err("The replay is rejected too.");

	assert!(err.is_unauthorized());
	assert!(err.request().expect("Status errors carry the request.").is_retried());
	assert_eq!(err.request().and_then(RequestDescriptor::bearer_token), Some("A2"));
	assert_eq!(backend.refresh_calls().len(), 1);
	assert_eq!(backend.requests_for("/api/admin/roles").len(), 2);
	assert_eq!(store.load().expect("Store should load."), Some(CredentialPair::new("A2", "R2")));
	assert_eq!(logout.calls(), 0);
}

#[tokio::test]
async fn late_unauthorized_with_stale_token_replays_without_refreshing() {
	let backend = ScriptedBackend::new("A2", 200, RENEWED).slow("/api/culture/slow").open_refresh();
	let (gateway, _) = build_test_gateway(BASE, seeded_store("A1", "R1"), backend.clone());
	let slow = spawn_get(&gateway, "/api/culture/slow");

	wait_until("the slow request is in flight", || {
		!backend.requests_for("/api/culture/slow").is_empty()
	})
	.await;

	gateway.get("/api/task/list").await.expect("The fast request refreshes and succeeds.");

	assert_eq!(backend.refresh_calls().len(), 1);

	backend.release_slow();

	let response = slow
		.await
		.expect("Slow task should not panic.")
		.expect("The slow request should be replayed with the renewed token.");

	assert_eq!(response.status, 200);
	assert_eq!(backend.refresh_calls().len(), 1, "A late 401 must not start a second refresh.");
	assert_eq!(
		backend.requests_for("/api/culture/slow"),
		vec![Some("A1".to_owned()), Some("A2".to_owned())],
	);
	assert_eq!(gateway.metrics().stale_replays(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dropping_the_leader_abandons_followers_and_keeps_credentials() {
	let backend = ScriptedBackend::new("A2", 200, RENEWED);
	let store = seeded_store("A1", "R1");
	let (gateway, logout) = build_test_gateway(BASE, store.clone(), backend.clone());
	let leader = spawn_get(&gateway, "/api/task/list");

	wait_until("the refresh call is in flight", || !backend.refresh_calls().is_empty()).await;

	let follower = spawn_get(&gateway, "/api/experiment/log");

	wait_until("the follower is queued", || gateway.pending_requests() == 1).await;
	leader.abort();

	let err = tokio::time::timeout(StdDuration::from_secs(5), follower)
		.await
		.expect("Follower should settle once the leader is dropped.")
		.expect("Follower task should not panic.")
		.expect_err("Follower should be rejected.");

	assert!(matches!(err, Error::Refresh(RefreshError::Abandoned)));
	assert!(!gateway.is_refreshing());
	assert_eq!(store.load().expect("Store should load."), Some(CredentialPair::new("A1", "R1")));
	assert_eq!(logout.calls(), 0);
}

#[tokio::test]
async fn separate_gateways_do_not_share_refresh_state() {
	let backend = ScriptedBackend::new("A2", 200, RENEWED);
	let (first, _) = build_test_gateway(BASE, seeded_store("A1", "R1"), backend.clone());
	let (second, _) = build_test_gateway(BASE, seeded_store("A1", "R1"), backend.clone());
	let leader = spawn_get(&first, "/api/task/list");

	wait_until("the first gateway is refreshing", || first.is_refreshing()).await;

	assert!(!second.is_refreshing());
	assert_eq!(second.pending_requests(), 0);

	backend.release_refresh(1);
	leader
		.await
		.expect("Leader task should not panic.")
		.expect("Leader should succeed after the refresh.");
}

#[tokio::test]
async fn late_unauthorized_after_fatal_logout_does_not_refresh_again() {
	let backend = ScriptedBackend::new("A2", 400, "{\"message\":\"refresh token expired\"}")
		.slow("/api/culture/slow")
		.open_refresh();
	let store = seeded_store("A1", "R1");
	let (gateway, logout) = build_test_gateway(BASE, store.clone(), backend.clone());
	let slow = spawn_get(&gateway, "/api/culture/slow");

	wait_until("the slow request is in flight", || {
		!backend.requests_for("/api/culture/slow").is_empty()
	})
	.await;

	let err = gateway.get("/api/task/list").await.expect_err("The refresh is rejected.");

	assert!(matches!(err, Error::Refresh(RefreshError::Rejected { status: 400, .. })));
	assert_eq!(logout.calls(), 1);

	backend.release_slow();

	let err = slow
		.await
		.expect("Slow task should not panic.")
		.expect_err("The slow request's credential is gone.");

	assert!(err.is_unauthorized());
	assert_eq!(backend.refresh_calls().len(), 1, "Rejected credentials are never sent again.");
	assert_eq!(logout.calls(), 1, "The fatal hook fires once per failed refresh.");
	assert_eq!(backend.requests_for("/api/culture/slow").len(), 1);
	assert!(store.is_empty());
}
