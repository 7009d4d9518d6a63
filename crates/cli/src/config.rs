//! Mapping configuration.
//!
//! The configuration file is JSON:
//!
//! ```json
//! {
//!   "host": "localhost",
//!   "port": 9222,
//!   "mappings": [
//!     { "url": "http://localhost:8080/js/", "path": "./src/js" }
//!   ]
//! }
//! ```
//!
//! It is looked up at `--config <FILE>`, then `./chromesync.json`, then
//! `<config dir>/chromesync/config.json`. Relative mapping paths resolve
//! against the directory holding the file; `--map` paths against the working
//! directory.

use std::path::{Path, PathBuf};

use anyhow::Context;
use chromesync_runtime::{Mapping, PathMapper};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Result, SyncError};

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 9222;
pub const CONFIG_FILE_NAME: &str = "chromesync.json";

/// On-disk configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub host: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub port: Option<u16>,
	#[serde(default)]
	pub mappings: Vec<MappingEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingEntry {
	pub url: String,
	pub path: PathBuf,
}

/// Values given on the command line; they take precedence over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
	pub config: Option<PathBuf>,
	pub host: Option<String>,
	pub port: Option<u16>,
	pub maps: Vec<MappingEntry>,
}

/// Effective settings after merging file and flags.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
	pub host: String,
	pub port: u16,
	pub mappings: Vec<Mapping>,
	/// The configuration file used, if any.
	pub source: Option<PathBuf>,
}

impl Settings {
	pub fn mapper(&self) -> PathMapper {
		PathMapper::new(self.mappings.clone())
	}
}

/// Parses a `URL=DIR` command-line mapping.
pub fn parse_map_arg(value: &str) -> std::result::Result<MappingEntry, String> {
	let (url, path) = value
		.split_once('=')
		.ok_or_else(|| format!("expected URL=DIR, got `{value}`"))?;
	if url.is_empty() || path.is_empty() {
		return Err(format!("expected URL=DIR, got `{value}`"));
	}
	Ok(MappingEntry {
		url: url.to_string(),
		path: PathBuf::from(path),
	})
}

/// Finds the configuration file to use.
///
/// An explicit path must exist; the default locations are optional.
pub fn locate_config(explicit: Option<&Path>, cwd: &Path) -> Result<Option<PathBuf>> {
	if let Some(path) = explicit {
		let path = absolutize(path, cwd);
		if !path.is_file() {
			return Err(SyncError::Config(format!("config file not found: {}", path.display())));
		}
		return Ok(Some(path));
	}

	let local = cwd.join(CONFIG_FILE_NAME);
	if local.is_file() {
		return Ok(Some(local));
	}

	let global = dirs::config_dir().map(|dir| dir.join("chromesync").join("config.json"));
	Ok(global.filter(|path| path.is_file()))
}

pub fn load_config_file(path: &Path) -> anyhow::Result<ConfigFile> {
	let contents = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
	let config: ConfigFile =
		serde_json::from_str(&contents).with_context(|| format!("Failed to parse {}", path.display()))?;
	debug!(path = %path.display(), mappings = config.mappings.len(), "Loaded config file");
	Ok(config)
}

/// Merges the configuration file (if any) with `overrides`.
pub fn resolve_settings(overrides: &Overrides, cwd: &Path) -> Result<Settings> {
	let source = locate_config(overrides.config.as_deref(), cwd)?;
	let file = match &source {
		Some(path) => load_config_file(path).map_err(|e| SyncError::Config(format!("{e:#}")))?,
		None => ConfigFile::default(),
	};
	let file_dir = source.as_deref().and_then(Path::parent).unwrap_or(cwd);

	let mut mappings = Vec::with_capacity(file.mappings.len() + overrides.maps.len());
	for entry in &file.mappings {
		mappings.push(to_mapping(entry, file_dir)?);
	}
	for entry in &overrides.maps {
		mappings.push(to_mapping(entry, cwd)?);
	}

	Ok(Settings {
		host: overrides.host.clone().or(file.host).unwrap_or_else(|| DEFAULT_HOST.to_string()),
		port: overrides.port.or(file.port).unwrap_or(DEFAULT_PORT),
		mappings,
		source,
	})
}

fn to_mapping(entry: &MappingEntry, base: &Path) -> Result<Mapping> {
	url::Url::parse(&entry.url).map_err(|e| SyncError::Config(format!("invalid mapping URL `{}`: {e}", entry.url)))?;
	let directory = absolutize(&entry.path, base);
	if !directory.is_dir() {
		warn!(url = %entry.url, path = %directory.display(), "Mapped directory does not exist");
	}
	Ok(Mapping::new(entry.url.clone(), directory))
}

fn absolutize(path: &Path, base: &Path) -> PathBuf {
	if path.is_absolute() {
		path.to_path_buf()
	} else {
		base.join(path)
	}
}
