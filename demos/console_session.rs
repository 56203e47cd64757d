//! Demonstrates an admin-console session whose access token expires mid-session.
//!
//! The mock backend rejects the first token, the gateway renews it at the refresh endpoint, and
//! the original request is replayed with the new credential without the caller noticing.

// std
use std::sync::Arc;
// crates.io
use color_eyre::Result;
use httpmock::prelude::*;
// self
use auth_gateway::{
	auth::CredentialPair,
	config::GatewayConfig,
	gateway::Gateway,
	reqwest::Client,
	store::{CredentialStore, MemoryStore},
	transport::{ReqwestTransport, RequestDescriptor},
	url::Url,
};

#[tokio::main]
async fn main() -> Result<()> {
	color_eyre::install()?;

	let server = MockServer::start_async().await;
	let expired = server
		.mock_async(|when, then| {
			when.method(GET).path("/api/task/list").header("authorization", "Bearer stale-access");
			then.status(401);
		})
		.await;
	let refresh = server
		.mock_async(|when, then| {
			when.method(POST)
				.path(GatewayConfig::DEFAULT_REFRESH_PATH)
				.json_body(serde_json::json!({ "refreshToken": "demo-refresh" }));
			then.status(200)
				.header("content-type", "application/json")
				.body("{\"accessToken\":\"fresh-access\",\"refreshToken\":\"rotated-refresh\"}");
		})
		.await;
	let tasks = server
		.mock_async(|when, then| {
			when.method(GET).path("/api/task/list").header("authorization", "Bearer fresh-access");
			then.status(200)
				.header("content-type", "application/json")
				.body("[{\"id\":1,\"name\":\"subculture tray 4\"}]");
		})
		.await;
	let store: Arc<dyn CredentialStore> = Arc::new(MemoryStore::default());
	let transport = ReqwestTransport::with_client(
		Client::builder()
			.danger_accept_invalid_certs(true)
			.danger_accept_invalid_hostnames(true)
			.build()?,
	);
	let gateway = Gateway::builder(GatewayConfig::builder(Url::parse(&server.base_url())?).build()?)
		.store(store)
		.transport(transport)
		.on_fatal_auth_failure(|login: &str| println!("Session expired, redirecting to {login}."))
		.build()?;

	gateway.login(&CredentialPair::new("stale-access", "demo-refresh"))?;

	let listed: serde_json::Value = gateway.send_json(RequestDescriptor::get("/api/task/list")).await?;

	println!("Tasks: {listed}.");
	println!("Refreshes performed: {}.", gateway.metrics().successes());

	expired.assert_async().await;
	refresh.assert_async().await;
	tasks.assert_async().await;

	Ok(())
}
