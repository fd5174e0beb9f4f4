//! Lists devices and sends a command with a personal access token, against a local mock of the
//! SmartThings API, then prints the rate-limit budget the responses advertised.

// std
use std::sync::Arc;
// crates.io
use color_eyre::Result;
use httpmock::prelude::*;
use url::Url;
// self
use smartthings_client::{
	api::devices::{self, DeviceCommand},
	client::Client,
	config::ClientConfig,
	context::CallContext,
	flows::StaticToken,
};

#[tokio::main]
async fn main() -> Result<()> {
	color_eyre::install()?;

	let server = MockServer::start_async().await;
	let list_mock = server
		.mock_async(|when, then| {
			when.method(GET).path("/v1/devices").header("authorization", "Bearer demo-pat");
			then.status(200)
				.header("content-type", "application/json")
				.header("X-RateLimit-Limit", "250")
				.header("X-RateLimit-Remaining", "248")
				.body(
					r#"{"items":[{"deviceId":"dev-porch","label":"Porch light"},{"deviceId":"dev-hall","name":"Hall switch"}]}"#,
				);
		})
		.await;
	let command_mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/v1/devices/dev-porch/commands");
			then.status(200)
				.header("content-type", "application/json")
				.header("X-RateLimit-Remaining", "247")
				.body(r#"{"results":[{"id":"cmd-1","status":"ACCEPTED"}]}"#);
		})
		.await;
	let config = ClientConfig::default()
		.with_base_url(Url::parse(&server.url("/v1"))?)
		.with_rate_limit_observer(Arc::new(|snapshot| {
			println!("rate limit update: remaining={:?}", snapshot.remaining);
		}));
	let client = Client::new(StaticToken::new("demo-pat"), config)?;
	let ctx = CallContext::new();
	let listed = devices::list(&client, &ctx).await?;

	for device in &listed {
		println!("{} ({})", device.display_name(), device.device_id);
	}

	let results =
		devices::execute_commands(&client, &ctx, "dev-porch", &[DeviceCommand::new("switch", "on")])
			.await?;

	println!("command results: {results:?}");
	println!("remaining budget: {:?}", client.rate_limits().remaining());

	list_mock.assert_async().await;
	command_mock.assert_async().await;

	Ok(())
}
