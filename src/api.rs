//! Thin resource mappers over [`Client`].
//!
//! List endpoints share the paging envelope `{"items": [...], "_links": {"next": {"href": ..}}}`;
//! [`collect_pages`] follows `next` links until the server stops returning them.

pub mod devices;
pub mod locations;

// crates.io
use serde::de::DeserializeOwned;
// self
use crate::{_prelude::*, client::Client, context::CallContext, error::ResultExt};

/// One page of a list endpoint.
#[derive(Clone, Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct Page<T> {
	/// Items on this page.
	#[serde(default)]
	pub items: Vec<T>,
	/// Navigation links.
	#[serde(default, rename = "_links")]
	pub links: Option<PageLinks>,
}
impl<T> Page<T> {
	/// Location of the following page, if any.
	pub fn next_href(&self) -> Option<&str> {
		self.links.as_ref()?.next.as_ref().map(|link| link.href.as_str())
	}
}

/// Navigation links attached to a [`Page`].
#[derive(Clone, Debug, Default, Deserialize)]
pub struct PageLinks {
	/// Next page.
	pub next: Option<Link>,
	/// Previous page.
	pub previous: Option<Link>,
}

/// Hyperlink inside [`PageLinks`].
#[derive(Clone, Debug, Deserialize)]
pub struct Link {
	/// Absolute or base-relative URL.
	pub href: String,
}

/// Fetches `path` and every following page, concatenating their items.
///
/// Stops early if the server hands back a `next` link it already served.
pub async fn collect_pages<T>(
	client: &Client,
	ctx: &CallContext,
	path: &str,
	operation: &'static str,
) -> Result<Vec<T>>
where
	T: DeserializeOwned,
{
	let mut items = Vec::new();
	let mut visited = vec![path.to_owned()];
	let mut next = path.to_owned();

	loop {
		let page: Page<T> = client.get_json(ctx, &next).await.context(operation)?;
		let following = page.next_href().map(str::to_owned);

		items.extend(page.items);

		match following {
			Some(href) if !visited.contains(&href) => {
				visited.push(href.clone());

				next = href;
			},
			_ => return Ok(items),
		}
	}
}
