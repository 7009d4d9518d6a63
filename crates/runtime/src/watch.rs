//! Filesystem watch bookkeeping.
//!
//! Watches are installed per directory and ref-counted by the files inside
//! them that a session cares about. The directory watch goes away with the
//! last of its files.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use notify::event::ModifyKind;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::Result;

/// Directory-level watch primitive.
pub trait DirectoryWatcher: Send {
	fn watch(&mut self, directory: &Path) -> Result<()>;
	fn unwatch(&mut self, directory: &Path) -> Result<()>;
}

/// A watcher together with the stream of modified file paths it produces.
pub struct FileWatch {
	pub watcher: Box<dyn DirectoryWatcher>,
	pub events: mpsc::UnboundedReceiver<PathBuf>,
}

/// Creates one [`FileWatch`] per session.
pub trait WatcherFactory: Send + Sync + 'static {
	fn create(&self) -> Result<FileWatch>;
}

/// [`DirectoryWatcher`] backed by the platform's native notification API.
pub struct NotifyWatcher {
	inner: RecommendedWatcher,
}

impl NotifyWatcher {
	pub fn open() -> Result<FileWatch> {
		let (tx, events) = mpsc::unbounded_channel();
		let inner = notify::recommended_watcher(move |res: notify::Result<notify::Event>| match res {
			Ok(event) => {
				if is_content_change(&event.kind) {
					for path in event.paths {
						let _ = tx.send(path);
					}
				}
			}
			Err(e) => warn!("File watch error: {}", e),
		})?;
		Ok(FileWatch {
			watcher: Box::new(NotifyWatcher { inner }),
			events,
		})
	}
}

fn is_content_change(kind: &EventKind) -> bool {
	match kind {
		EventKind::Modify(ModifyKind::Metadata(_)) => false,
		EventKind::Modify(_) | EventKind::Create(_) => true,
		_ => false,
	}
}

impl DirectoryWatcher for NotifyWatcher {
	fn watch(&mut self, directory: &Path) -> Result<()> {
		self.inner.watch(directory, RecursiveMode::NonRecursive)?;
		Ok(())
	}

	fn unwatch(&mut self, directory: &Path) -> Result<()> {
		self.inner.unwatch(directory)?;
		Ok(())
	}
}

/// Builds a [`NotifyWatcher`] for every session.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotifyWatcherFactory;

impl WatcherFactory for NotifyWatcherFactory {
	fn create(&self) -> Result<FileWatch> {
		NotifyWatcher::open()
	}
}

struct RegistryState {
	/// `None` after [`WatchRegistry::shutdown`].
	watcher: Option<Box<dyn DirectoryWatcher>>,
	watching: BTreeMap<PathBuf, BTreeSet<PathBuf>>,
}

/// Tracks watched files per directory.
///
/// A directory is watched iff its entry exists, and an entry exists only while
/// it holds at least one file.
pub struct WatchRegistry {
	state: Mutex<RegistryState>,
}

impl WatchRegistry {
	pub fn new(watcher: Box<dyn DirectoryWatcher>) -> Self {
		Self {
			state: Mutex::new(RegistryState {
				watcher: Some(watcher),
				watching: BTreeMap::new(),
			}),
		}
	}

	/// Starts tracking `path`, installing a watch on its directory if needed.
	///
	/// Returns true if a new directory watch was installed.
	pub fn start_watching(&self, path: &Path) -> Result<bool> {
		let directory = parent_dir(path);
		let mut state = self.state.lock();

		if let Some(files) = state.watching.get_mut(&directory) {
			files.insert(path.to_path_buf());
			return Ok(false);
		}

		let Some(watcher) = state.watcher.as_mut() else {
			debug!(path = %path.display(), "Registry shut down, not watching");
			return Ok(false);
		};
		watcher.watch(&directory)?;
		debug!(directory = %directory.display(), "Watching directory");
		state.watching.insert(directory, BTreeSet::from([path.to_path_buf()]));
		Ok(true)
	}

	/// Stops tracking `path`, removing its directory watch when it was the last file.
	///
	/// Returns true if a directory watch was removed.
	pub fn stop_watching(&self, path: &Path) -> Result<bool> {
		let directory = parent_dir(path);
		let mut state = self.state.lock();

		let Some(files) = state.watching.get_mut(&directory) else {
			return Ok(false);
		};
		files.remove(path);
		if !files.is_empty() {
			return Ok(false);
		}

		state.watching.remove(&directory);
		if let Some(watcher) = state.watcher.as_mut() {
			watcher.unwatch(&directory)?;
		}
		debug!(directory = %directory.display(), "Stopped watching directory");
		Ok(true)
	}

	/// Removes every watch. Returns the number of directories that were watched.
	pub fn clear_all(&self) -> usize {
		let mut state = self.state.lock();
		let watching = std::mem::take(&mut state.watching);
		if let Some(watcher) = state.watcher.as_mut() {
			for directory in watching.keys() {
				if let Err(e) = watcher.unwatch(directory) {
					debug!(directory = %directory.display(), error = %e, "Failed to remove watch");
				}
			}
		}
		watching.len()
	}

	/// Clears every watch and drops the watcher, ending its event stream.
	pub fn shutdown(&self) {
		self.clear_all();
		self.state.lock().watcher = None;
	}

	pub fn is_watching(&self, path: &Path) -> bool {
		self.state
			.lock()
			.watching
			.get(&parent_dir(path))
			.is_some_and(|files| files.contains(path))
	}

	/// Directories currently under observation.
	pub fn directories(&self) -> Vec<PathBuf> {
		self.state.lock().watching.keys().cloned().collect()
	}
}

fn parent_dir(path: &Path) -> PathBuf {
	path.parent().map(Path::to_path_buf).unwrap_or_default()
}
