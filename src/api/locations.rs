//! Location endpoints.

// self
use crate::{
	_prelude::*,
	api::collect_pages,
	client::Client,
	context::CallContext,
	error::ResultExt,
};

/// Location as returned by `GET /locations`.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
	/// Location id.
	pub location_id: String,
	/// Display name.
	pub name: String,
	/// ISO 3166 alpha-3 country code.
	#[serde(default)]
	pub country_code: Option<String>,
	/// IANA time zone.
	#[serde(default)]
	pub time_zone_id: Option<String>,
}

/// Lists every location visible to the token, following pagination.
pub async fn list(client: &Client, ctx: &CallContext) -> Result<Vec<Location>> {
	collect_pages(client, ctx, "locations", "locations.list").await
}

/// Fetches one location.
pub async fn get(client: &Client, ctx: &CallContext, location_id: &str) -> Result<Location> {
	client.get_json(ctx, &format!("locations/{location_id}")).await.context("locations.get")
}
