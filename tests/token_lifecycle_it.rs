#![cfg(feature = "reqwest")]

// std
use std::{env, fs, path::PathBuf};
// crates.io
use httpmock::prelude::*;
// self
use smartthings_client::{
	_preludet::*,
	auth::TokenState,
	context::CallContext,
	error::ErrorKind,
	flows::TokenManager,
	store::{FileStore, TokenStore},
};

const BASIC_AUTH: &str = "Basic Y2xpZW50LXRlc3Q6c2VjcmV0LXRlc3Q=";

fn stale_with_refresh() -> TokenState {
	token_fixture("access-stale", Duration::minutes(3), Some(("refresh-live", Duration::hours(24))))
}

fn temp_path(tag: &str) -> PathBuf {
	let unique = format!(
		"smartthings-client-{tag}-{}-{}",
		std::process::id(),
		OffsetDateTime::now_utc().unix_timestamp_nanos()
	);

	env::temp_dir().join(unique).join("tokens.json")
}

#[tokio::test]
async fn three_minute_expiry_refreshes_and_persists() {
	let server = MockServer::start_async().await;
	let path = temp_path("scenario");
	let store: Arc<dyn TokenStore> = Arc::new(FileStore::new(&path));
	let manager = TokenManager::with_transport(
		test_oauth_config(&server.base_url()),
		store.clone(),
		test_reqwest_transport(),
	);
	let mock = server
		.mock_async(|when, then| {
			when.method(POST)
				.path("/oauth/token")
				.header("authorization", BASIC_AUTH)
				.header("content-type", "application/x-www-form-urlencoded");
			then.status(200).header("content-type", "application/json").body(
				r#"{"access_token":"access-new","refresh_token":"refresh-new","token_type":"bearer","expires_in":3600}"#,
			);
		})
		.await;

	manager.set_tokens(stale_with_refresh()).await.expect("Seeding tokens should succeed.");

	let ctx = CallContext::new();
	let state = manager.ensure_valid(&ctx).await.expect("Refresh should succeed.");

	mock.assert_async().await;
	manager.flush(&ctx).await.expect("Background persistence should finish.");

	assert_eq!(state.access_token.expose(), "access-new");
	assert_eq!(state.refresh_token.as_ref().map(|secret| secret.expose()), Some("refresh-new"));
	assert!(state.remaining_at(OffsetDateTime::now_utc()) > Duration::minutes(55));

	let persisted = store.load().await.expect("Persisted copy should load.");

	assert_eq!(persisted, state);
	assert_eq!(manager.refresh_metrics.network_refreshes(), 1);

	fs::remove_dir_all(path.parent().expect("Temp path should have a parent."))
		.expect("Failed to remove temporary store directory.");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn fifty_concurrent_callers_share_one_refresh() {
	let server = MockServer::start_async().await;
	let (manager, store) = build_test_manager(test_oauth_config(&server.base_url()));
	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/oauth/token");
			then.status(200)
				.header("content-type", "application/json")
				.delay(std::time::Duration::from_millis(100))
				.body(
					r#"{"access_token":"access-shared","token_type":"bearer","expires_in":3600}"#,
				);
		})
		.await;

	manager.set_tokens(stale_with_refresh()).await.expect("Seeding tokens should succeed.");

	let handles = (0..50)
		.map(|_| {
			let manager = manager.clone();

			tokio::spawn(async move { manager.ensure_valid(&CallContext::new()).await })
		})
		.collect::<Vec<_>>();

	for handle in handles {
		let state = handle
			.await
			.expect("Caller task should not panic.")
			.expect("Every caller should observe the refreshed token.");

		assert_eq!(state.access_token.expose(), "access-shared");
	}

	mock.assert_calls_async(1).await;

	assert_eq!(manager.refresh_metrics.attempts(), 50);
	assert_eq!(manager.refresh_metrics.network_refreshes(), 1);

	manager.flush(&CallContext::new()).await.expect("Background persistence should finish.");

	assert_eq!(
		store.snapshot().map(|state| state.access_token.expose().to_owned()).as_deref(),
		Some("access-shared")
	);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn expired_refresh_token_fails_every_caller_without_network() {
	let server = MockServer::start_async().await;
	let (manager, _) = build_test_manager(test_oauth_config(&server.base_url()));
	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/oauth/token");
			then.status(200);
		})
		.await;

	manager
		.set_tokens(token_fixture(
			"access-stale",
			Duration::minutes(1),
			Some(("refresh-dead", Duration::seconds(-1))),
		))
		.await
		.expect("Seeding tokens should succeed.");

	let handles = (0..20)
		.map(|_| {
			let manager = manager.clone();

			tokio::spawn(async move { manager.ensure_valid(&CallContext::new()).await })
		})
		.collect::<Vec<_>>();

	for handle in handles {
		let err = handle
			.await
			.expect("Caller task should not panic.")
			.expect_err("Dead refresh token should fail.");

		assert_eq!(err.kind(), ErrorKind::ReauthenticationRequired);
	}

	mock.assert_calls_async(0).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failed_refresh_is_shared_by_waiting_callers() {
	let server = MockServer::start_async().await;
	let (manager, store) = build_test_manager(test_oauth_config(&server.base_url()));
	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/oauth/token");
			then.status(502)
				.delay(std::time::Duration::from_millis(100))
				.body("<html>upstream unavailable</html>");
		})
		.await;
	let seeded = stale_with_refresh();

	manager.set_tokens(seeded.clone()).await.expect("Seeding tokens should succeed.");

	let handles = (0..10)
		.map(|_| {
			let manager = manager.clone();

			tokio::spawn(async move { manager.ensure_valid(&CallContext::new()).await })
		})
		.collect::<Vec<_>>();

	for handle in handles {
		let err = handle
			.await
			.expect("Caller task should not panic.")
			.expect_err("Failed refresh should reach every waiting caller.");

		assert_eq!(err.kind(), ErrorKind::TokenEndpoint);
		assert_eq!(err.status(), Some(502));
		assert!(err.to_string().contains("upstream unavailable"));
	}

	mock.assert_calls_async(1).await;

	assert_eq!(manager.current().await, Some(seeded.clone()));
	assert_eq!(store.snapshot(), Some(seeded));
}

#[tokio::test]
async fn invalid_grant_surfaces_status_and_forces_reauthentication() {
	let server = MockServer::start_async().await;
	let (manager, _) = build_test_manager(test_oauth_config(&server.base_url()));
	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/oauth/token");
			then.status(400).header("content-type", "application/json").body(
				r#"{"error":"invalid_grant","error_description":"Refresh token revoked"}"#,
			);
		})
		.await;

	manager.set_tokens(stale_with_refresh()).await.expect("Seeding tokens should succeed.");

	let ctx = CallContext::new();
	let err = manager.ensure_valid(&ctx).await.expect_err("Revoked refresh token should fail.");

	assert_eq!(err.status(), Some(400));
	assert!(err.to_string().contains("Refresh token revoked"));

	let err = manager.ensure_valid(&ctx).await.expect_err("Poisoned state should fail fast.");

	assert_eq!(err.kind(), ErrorKind::ReauthenticationRequired);

	mock.assert_calls_async(1).await;
}

#[tokio::test]
async fn code_exchange_then_refresh_cycle() {
	let server = MockServer::start_async().await;
	let (manager, store) = build_test_manager(test_oauth_config(&server.base_url()));
	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/oauth/token").header("authorization", BASIC_AUTH);
			then.status(200).header("content-type", "application/json").body(
				r#"{"access_token":"access-code","refresh_token":"refresh-code","token_type":"bearer","expires_in":86400,"scope":"r:devices:* x:devices:*"}"#,
			);
		})
		.await;
	let request = manager.authorization_request(None).expect("Authorization URL should build.");

	assert!(request.url.as_str().starts_with(&server.url("/oauth/authorize")));
	assert!(request.validate_state(&request.state).is_ok());

	let state = manager
		.exchange_code(&CallContext::new(), "auth-code")
		.await
		.expect("Code exchange should succeed.");

	mock.assert_async().await;

	assert_eq!(state.access_token.expose(), "access-code");
	assert!(state.scope.contains("x:devices:*"));
	assert_eq!(store.snapshot(), Some(state.clone()));
	assert_eq!(
		manager.ensure_valid(&CallContext::new()).await.expect("Fresh token is valid."),
		state
	);

	manager.clear().await.expect("Clearing should succeed.");

	assert_eq!(
		manager.ensure_valid(&CallContext::new()).await.map(|_| ()).map_err(|e| e.kind()),
		Err(ErrorKind::Unauthenticated)
	);
}
