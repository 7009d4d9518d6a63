use std::io::{self, Write};
use std::path::PathBuf;

use serde::Serialize;

use crate::config::Settings;
use crate::output::TextOutput;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Resolution {
	pub url: String,
	/// `None` when no configured prefix covers the URL.
	pub path: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveReport {
	pub resolutions: Vec<Resolution>,
}

impl TextOutput for ResolveReport {
	fn write_text(&self, out: &mut dyn Write) -> io::Result<()> {
		for resolution in &self.resolutions {
			match &resolution.path {
				Some(path) => writeln!(out, "{} -> {}", resolution.url, path.display())?,
				None => writeln!(out, "{} -> (no mapping)", resolution.url)?,
			}
		}
		Ok(())
	}
}

pub fn run(settings: &Settings, urls: &[String]) -> ResolveReport {
	let mapper = settings.mapper();
	ResolveReport {
		resolutions: urls
			.iter()
			.map(|url| Resolution {
				url: url.clone(),
				path: mapper.resolve(url),
			})
			.collect(),
	}
}
