//! URL prefix to local directory mapping.
//!
//! Matching is a plain string operation: the configured prefix sharing the
//! longest common prefix with the URL wins, and only if that common prefix is
//! the whole configured prefix. URLs are neither normalized nor decoded, so
//! overlapping prefixes can resolve in surprising ways.

use std::path::{Path, PathBuf};

/// One configured `(url_prefix, directory)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mapping {
	pub url_prefix: String,
	pub directory: PathBuf,
}

impl Mapping {
	pub fn new(url_prefix: impl Into<String>, directory: impl Into<PathBuf>) -> Self {
		Self {
			url_prefix: url_prefix.into(),
			directory: directory.into(),
		}
	}
}

/// Immutable mapping table shared by every session.
#[derive(Debug, Clone, Default)]
pub struct PathMapper {
	mappings: Vec<Mapping>,
}

impl PathMapper {
	pub fn new(mappings: Vec<Mapping>) -> Self {
		Self { mappings }
	}

	pub fn mappings(&self) -> &[Mapping] {
		&self.mappings
	}

	pub fn is_empty(&self) -> bool {
		self.mappings.is_empty()
	}

	/// Resolves a script URL to a local file path.
	pub fn resolve(&self, url: &str) -> Option<PathBuf> {
		let (mapping, common) = self
			.mappings
			.iter()
			.map(|mapping| (mapping, common_prefix_len(&mapping.url_prefix, url)))
			.fold(None, |best: Option<(&Mapping, usize)>, candidate| match best {
				Some((_, len)) if len >= candidate.1 => best,
				_ => Some(candidate),
			})?;

		// A partial match names no configured prefix.
		if common == 0 || common != mapping.url_prefix.len() {
			return None;
		}

		let remainder = url[common..].trim_start_matches('/');
		if remainder.is_empty() {
			return None;
		}
		Some(join(&mapping.directory, remainder))
	}
}

/// Byte length of the longest common prefix, on char boundaries.
fn common_prefix_len(a: &str, b: &str) -> usize {
	a.char_indices()
		.zip(b.chars())
		.find(|((_, ca), cb)| ca != cb)
		.map(|((i, _), _)| i)
		.unwrap_or_else(|| a.len().min(b.len()))
}

fn join(directory: &Path, remainder: &str) -> PathBuf {
	remainder.split('/').filter(|segment| !segment.is_empty()).fold(directory.to_path_buf(), |path, segment| path.join(segment))
}
