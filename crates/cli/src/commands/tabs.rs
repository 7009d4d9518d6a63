use std::io::{self, Write};

use chromesync_protocol::TabDescriptor;
use serde::Serialize;

use crate::config::Settings;
use crate::discovery::HttpTabSource;
use crate::error::Result;
use crate::output::TextOutput;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TabEntry {
	pub id: String,
	pub title: String,
	pub url: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub debugger_url: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TabsReport {
	pub endpoint: String,
	pub tabs: Vec<TabEntry>,
}

impl TextOutput for TabsReport {
	fn write_text(&self, out: &mut dyn Write) -> io::Result<()> {
		if self.tabs.is_empty() {
			return writeln!(out, "No page tabs at {}", self.endpoint);
		}
		for tab in &self.tabs {
			let status = if tab.debugger_url.is_some() { "" } else { " (attached elsewhere)" };
			writeln!(out, "{}  {}{}", tab.id, tab.url, status)?;
			if !tab.title.is_empty() {
				writeln!(out, "    {}", tab.title)?;
			}
		}
		Ok(())
	}
}

/// Page tabs only; other targets cannot run page scripts.
pub fn summarize(endpoint: String, tabs: Vec<TabDescriptor>) -> TabsReport {
	TabsReport {
		endpoint,
		tabs: tabs
			.into_iter()
			.filter(TabDescriptor::is_page)
			.map(|tab| TabEntry {
				id: tab.id,
				title: tab.title,
				url: tab.url,
				debugger_url: tab.web_socket_debugger_url,
			})
			.collect(),
	}
}

pub async fn run(settings: &Settings) -> Result<TabsReport> {
	let source = HttpTabSource::new(&settings.host, settings.port)?;
	let tabs = source.fetch().await?;
	Ok(summarize(super::endpoint(settings), tabs))
}
