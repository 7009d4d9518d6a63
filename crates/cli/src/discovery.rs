//! Tab enumeration over the browser's remote-debugging HTTP endpoint.

use std::time::Duration;

use chromesync_protocol::TabDescriptor;
use chromesync_runtime::{BoxFuture, TabSource};
use tracing::debug;

use crate::error::{Result, SyncError};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// Lists tabs with `GET http://<host>:<port>/json`.
#[derive(Debug, Clone)]
pub struct HttpTabSource {
	client: reqwest::Client,
	endpoint: String,
}

impl HttpTabSource {
	pub fn new(host: &str, port: u16) -> Result<Self> {
		let client = reqwest::Client::builder()
			.timeout(REQUEST_TIMEOUT)
			.build()
			.map_err(|e| SyncError::Discovery(format!("Failed to create HTTP client: {}", e)))?;
		Ok(Self {
			client,
			endpoint: format!("http://{}:{}/json", host, port),
		})
	}

	pub fn endpoint(&self) -> &str {
		&self.endpoint
	}

	pub async fn fetch(&self) -> Result<Vec<TabDescriptor>> {
		let response = self.client.get(&self.endpoint).send().await.map_err(|e| {
			SyncError::Discovery(format!(
				"No browser with remote debugging at {}: {}\n\
				 Start Chrome with --remote-debugging-port to enable it.",
				self.endpoint, e
			))
		})?;

		if !response.status().is_success() {
			return Err(SyncError::Discovery(format!(
				"{} answered with unexpected status {}",
				self.endpoint,
				response.status()
			)));
		}

		let tabs: Vec<TabDescriptor> = response
			.json()
			.await
			.map_err(|e| SyncError::Discovery(format!("Failed to parse tab list from {}: {}", self.endpoint, e)))?;
		debug!(endpoint = %self.endpoint, count = tabs.len(), "Fetched tab list");
		Ok(tabs)
	}
}

impl TabSource for HttpTabSource {
	fn list_tabs(&self) -> BoxFuture<'_, chromesync_runtime::Result<Vec<TabDescriptor>>> {
		Box::pin(async move {
			self.fetch().await.map_err(|e| match e {
				SyncError::Discovery(message) => chromesync_runtime::Error::Discovery(message),
				other => chromesync_runtime::Error::Discovery(other.to_string()),
			})
		})
	}
}
