//! Walks through the OAuth lifecycle against a local mock token endpoint: build the
//! authorization URL, exchange the returned code, persist the tokens to disk, and let many
//! concurrent callers share a single refresh.

// std
use std::{env, sync::Arc};
// crates.io
use color_eyre::Result;
use httpmock::prelude::*;
use url::Url;
// self
use smartthings_client::{
	auth::TokenState,
	config::OAuthConfig,
	context::CallContext,
	flows::TokenManager,
	store::{FileStore, TokenStore},
};

#[tokio::main]
async fn main() -> Result<()> {
	color_eyre::install()?;

	let server = MockServer::start_async().await;
	let token_mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/oauth/token");
			then.status(200).header("content-type", "application/json").body(
				r#"{"access_token":"demo-access","refresh_token":"demo-refresh","token_type":"bearer","expires_in":3600}"#,
			);
		})
		.await;
	let config = OAuthConfig::builder("demo-client")
		.client_secret("demo-secret")
		.redirect_uri(Url::parse("https://app.example.com/callback")?)
		.authorization_endpoint(Url::parse(&server.url("/oauth/authorize"))?)
		.token_endpoint(Url::parse(&server.url("/oauth/token"))?)
		.build()?;
	let path = env::temp_dir().join(format!("smartthings-demo-{}", std::process::id()));
	let store: Arc<dyn TokenStore> = Arc::new(FileStore::new(path.join("tokens.json")));
	let manager = TokenManager::new(config, store.clone())?;
	let request = manager.authorization_request(None)?;

	println!("open in a browser: {}", request.url);

	// The redirect would hand back the same state together with the code.
	request.validate_state(&request.state)?;

	let ctx = CallContext::new();
	let issued = manager.exchange_code(&ctx, "demo-code").await?;

	println!("issued: {issued:?}");

	// Age the access token so the next callers find it stale.
	let stale = TokenState::builder()
		.access_token("demo-stale")
		.refresh_token("demo-refresh")
		.expires_in(time::Duration::minutes(1))
		.build()?;

	manager.set_tokens(stale).await?;

	let callers = (0..16)
		.map(|_| {
			let manager = manager.clone();

			tokio::spawn(async move { manager.ensure_valid(&CallContext::new()).await })
		})
		.collect::<Vec<_>>();

	for caller in callers {
		caller.await??;
	}

	token_mock.assert_calls_async(2).await;
	println!("refresh counters: {:?}", manager.refresh_metrics.snapshot());
	manager.flush(&CallContext::new()).await?;
	println!("persisted: {:?}", store.load().await?);

	manager.clear().await?;
	std::fs::remove_dir_all(path)?;

	Ok(())
}
