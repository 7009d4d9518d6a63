//! Tab descriptors served by the browser's `/json` endpoint.

use serde::{Deserialize, Serialize};

/// One entry of the `/json` tab list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabDescriptor {
	pub id: String,
	/// `page`, `iframe`, `service_worker`, `background_page`, ...
	#[serde(rename = "type")]
	pub kind: String,
	#[serde(default)]
	pub title: String,
	#[serde(default)]
	pub url: String,
	/// Missing when another client is already attached to the target.
	#[serde(default, rename = "webSocketDebuggerUrl", skip_serializing_if = "Option::is_none")]
	pub web_socket_debugger_url: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub devtools_frontend_url: Option<String>,
}

impl TabDescriptor {
	pub fn is_page(&self) -> bool {
		self.kind == "page"
	}

	/// Debugger connection address, only for page targets.
	pub fn debugger_address(&self) -> Option<&str> {
		if self.is_page() {
			self.web_socket_debugger_url.as_deref()
		} else {
			None
		}
	}
}
