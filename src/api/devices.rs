//! Device endpoints.

// self
use crate::{
	_prelude::*,
	api::collect_pages,
	client::Client,
	context::CallContext,
	error::ResultExt,
};

/// Device as returned by `GET /devices`.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
	/// Device id.
	pub device_id: String,
	/// Manufacturer-assigned name.
	#[serde(default)]
	pub name: Option<String>,
	/// User-assigned label.
	#[serde(default)]
	pub label: Option<String>,
	/// Owning location.
	#[serde(default)]
	pub location_id: Option<String>,
	/// Room inside the location.
	#[serde(default)]
	pub room_id: Option<String>,
	/// Components and their capabilities.
	#[serde(default)]
	pub components: Vec<Component>,
}
impl Device {
	/// Label when set, otherwise the name, otherwise the id.
	pub fn display_name(&self) -> &str {
		self.label.as_deref().or(self.name.as_deref()).unwrap_or(&self.device_id)
	}
}

/// Device component.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Component {
	/// Component id, `main` for the primary one.
	pub id: String,
	/// Capabilities exposed by the component.
	#[serde(default)]
	pub capabilities: Vec<CapabilityRef>,
}

/// Capability reference inside a [`Component`].
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct CapabilityRef {
	/// Capability id, e.g. `switch`.
	pub id: String,
	/// Capability version.
	#[serde(default)]
	pub version: Option<u32>,
}

/// Command sent to `POST /devices/{id}/commands`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DeviceCommand {
	/// Target component.
	pub component: String,
	/// Capability that owns the command.
	pub capability: String,
	/// Command name.
	pub command: String,
	/// Positional arguments.
	#[serde(skip_serializing_if = "Vec::is_empty")]
	pub arguments: Vec<serde_json::Value>,
}
impl DeviceCommand {
	/// Builds an argument-less command for the `main` component.
	pub fn new(capability: impl Into<String>, command: impl Into<String>) -> Self {
		Self {
			component: "main".into(),
			capability: capability.into(),
			command: command.into(),
			arguments: Vec::new(),
		}
	}

	/// Targets another component.
	pub fn on_component(mut self, component: impl Into<String>) -> Self {
		self.component = component.into();

		self
	}

	/// Appends a positional argument.
	pub fn with_argument(mut self, argument: serde_json::Value) -> Self {
		self.arguments.push(argument);

		self
	}
}

/// Per-command result returned by the commands endpoint.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct CommandResult {
	/// Command correlation id.
	pub id: String,
	/// Status label, e.g. `ACCEPTED`.
	pub status: String,
}

#[derive(Serialize)]
struct CommandBatch<'a> {
	commands: &'a [DeviceCommand],
}

#[derive(Deserialize)]
struct CommandResults {
	#[serde(default)]
	results: Vec<CommandResult>,
}

/// Lists every device visible to the token, following pagination.
pub async fn list(client: &Client, ctx: &CallContext) -> Result<Vec<Device>> {
	collect_pages(client, ctx, "devices", "devices.list").await
}

/// Fetches one device.
pub async fn get(client: &Client, ctx: &CallContext, device_id: &str) -> Result<Device> {
	client.get_json(ctx, &format!("devices/{device_id}")).await.context("devices.get")
}

/// Executes `commands` against one device.
pub async fn execute_commands(
	client: &Client,
	ctx: &CallContext,
	device_id: &str,
	commands: &[DeviceCommand],
) -> Result<Vec<CommandResult>> {
	let results: CommandResults = client
		.post_json(ctx, &format!("devices/{device_id}/commands"), &CommandBatch { commands })
		.await
		.context("devices.execute_commands")?;

	Ok(results.results)
}
