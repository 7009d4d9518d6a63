//! Per-tab live-update session.
//!
//! A [`TabWatch`] binds one [`Protocol`] to one tab's debugger address. It
//! tracks the scripts the page loads, watches their local counterparts and
//! pushes edited sources back into the page. When the link drops it reconnects
//! after a fixed delay, reusing the same protocol so subscriptions carry over.
//!
//! ```text
//! Connecting ──open──▶ Connected ──close──▶ DisconnectedPendingRetry
//!     ▲                                              │
//!     └────────────────── timer ─────────────────────┘
//!
//! any state ──stop()──▶ Stopped
//! ```

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chromesync_protocol::{Enable, EnableResult, GlobalObjectCleared, ScriptId, ScriptParsed, ScriptParsedParams, SetScriptSource, SetScriptSourceResult};
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::connection::{Protocol, ProtocolOptions, Reply, ReplyCallback};
use crate::path_map::PathMapper;
use crate::transport::Connector;
use crate::watch::{FileWatch, WatchRegistry};

/// Tunables for a [`TabWatch`].
#[derive(Debug, Clone)]
pub struct SessionOptions {
	/// Wait between a dropped link and the next connection attempt.
	pub reconnect_delay: Duration,
	/// Updates remembered while disconnected; the oldest is dropped beyond this.
	pub max_pending_updates: usize,
	pub protocol: ProtocolOptions,
}

impl Default for SessionOptions {
	fn default() -> Self {
		Self {
			reconnect_delay: Duration::from_secs(2),
			max_pending_updates: 64,
			protocol: ProtocolOptions::default(),
		}
	}
}

impl SessionOptions {
	pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
		self.reconnect_delay = delay;
		self
	}

	pub fn with_max_pending_updates(mut self, max: usize) -> Self {
		self.max_pending_updates = max;
		self
	}

	pub fn with_protocol(mut self, protocol: ProtocolOptions) -> Self {
		self.protocol = protocol;
		self
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
	Connecting,
	Connected,
	DisconnectedPendingRetry,
	Stopped,
}

/// What the browser reported for a local file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptRecord {
	pub url: String,
	pub script_id: ScriptId,
}

/// Edits and the link they may be sent on.
///
/// Edits go straight out only once the current link has answered
/// `Debugger.enable`; until then they wait here.
#[derive(Default)]
struct UpdateQueue {
	/// Link epoch whose `Debugger.enable` succeeded, if that link is still up.
	enabled: Option<u64>,
	pending: VecDeque<PathBuf>,
}

#[derive(Default)]
struct RetrySlot {
	next_token: u64,
	timer: Option<(u64, JoinHandle<()>)>,
}

struct TabInner {
	address: String,
	protocol: Protocol,
	mapper: Arc<PathMapper>,
	options: SessionOptions,
	scripts: Mutex<HashMap<PathBuf, ScriptRecord>>,
	registry: WatchRegistry,
	updates: Mutex<UpdateQueue>,
	/// Bumped on every connection attempt.
	link_epoch: AtomicU64,
	state: Mutex<SessionState>,
	keep_alive: AtomicBool,
	retry: Mutex<RetrySlot>,
	file_events: Mutex<Option<JoinHandle<()>>>,
}

/// Live-update session for one tab.
///
/// Dropping the session stops it.
pub struct TabWatch {
	inner: Arc<TabInner>,
}

impl TabWatch {
	/// Creates the session and starts connecting to `address`.
	///
	/// Must be called from within a tokio runtime.
	pub fn start(
		address: impl Into<String>,
		mapper: Arc<PathMapper>,
		connector: Arc<dyn Connector>,
		file_watch: FileWatch,
		options: SessionOptions,
	) -> Self {
		let FileWatch { watcher, events } = file_watch;
		let inner = Arc::new(TabInner {
			address: address.into(),
			protocol: Protocol::with_options(connector, options.protocol.clone()),
			mapper,
			options,
			scripts: Mutex::new(HashMap::new()),
			registry: WatchRegistry::new(watcher),
			updates: Mutex::new(UpdateQueue::default()),
			link_epoch: AtomicU64::new(0),
			state: Mutex::new(SessionState::Connecting),
			keep_alive: AtomicBool::new(true),
			retry: Mutex::new(RetrySlot::default()),
			file_events: Mutex::new(None),
		});

		let weak = Arc::downgrade(&inner);
		inner.protocol.subscribe::<ScriptParsed, _>(move |params| {
			if let (Some(inner), Some(params)) = (weak.upgrade(), params) {
				inner.on_script_parsed(params);
			}
		});
		let weak = Arc::downgrade(&inner);
		inner.protocol.subscribe::<GlobalObjectCleared, _>(move |_| {
			if let Some(inner) = weak.upgrade() {
				inner.on_global_object_cleared();
			}
		});

		let task = tokio::spawn(file_event_loop(Arc::downgrade(&inner), events));
		*inner.file_events.lock() = Some(task);

		info!(address = %inner.address, "Starting tab session");
		inner.connect();
		Self { inner }
	}

	pub fn address(&self) -> &str {
		&self.inner.address
	}

	pub fn state(&self) -> SessionState {
		*self.inner.state.lock()
	}

	pub fn script_for(&self, path: &Path) -> Option<ScriptRecord> {
		self.inner.scripts.lock().get(path).cloned()
	}

	/// Local paths with a known script, sorted.
	pub fn tracked_paths(&self) -> Vec<PathBuf> {
		let mut paths: Vec<PathBuf> = self.inner.scripts.lock().keys().cloned().collect();
		paths.sort();
		paths
	}

	pub fn watched_directories(&self) -> Vec<PathBuf> {
		self.inner.registry.directories()
	}

	/// Paths modified while disconnected, oldest first.
	pub fn pending_updates(&self) -> Vec<PathBuf> {
		self.inner.updates.lock().pending.iter().cloned().collect()
	}

	/// Stops the session for good. Safe to call more than once.
	pub fn stop(&self) {
		self.inner.stop();
	}
}

impl Drop for TabWatch {
	fn drop(&mut self) {
		self.inner.stop();
	}
}

impl TabInner {
	fn set_state(&self, next: SessionState) {
		let mut state = self.state.lock();
		if *state != SessionState::Stopped {
			*state = next;
		}
	}

	fn connect(self: &Arc<Self>) {
		self.set_state(SessionState::Connecting);
		let epoch = self.link_epoch.fetch_add(1, Ordering::SeqCst) + 1;
		let on_open = Arc::downgrade(self);
		let on_close = Arc::downgrade(self);
		self.protocol.connect(
			self.address.clone(),
			move || {
				if let Some(inner) = on_open.upgrade() {
					inner.on_connected(epoch);
				}
			},
			move || {
				if let Some(inner) = on_close.upgrade() {
					inner.on_disconnected();
				}
			},
		);
	}

	fn on_connected(self: &Arc<Self>, epoch: u64) {
		if !self.keep_alive.load(Ordering::SeqCst) {
			return;
		}
		self.set_state(SessionState::Connected);
		info!(address = %self.address, "Connected, enabling debugger");

		// scriptParsed for every live script arrives before the reply.
		let weak = Arc::downgrade(self);
		let on_enabled: ReplyCallback<EnableResult> = Box::new(move |_: Reply<EnableResult>| {
			if let Some(inner) = weak.upgrade() {
				inner.on_debugger_enabled(epoch);
			}
		});
		if let Err(e) = self.protocol.send(Enable {}, Some(on_enabled), None) {
			warn!(address = %self.address, error = %e, "Failed to enable debugger");
		}
	}

	fn on_debugger_enabled(self: &Arc<Self>, epoch: u64) {
		if !self.keep_alive.load(Ordering::SeqCst) || self.link_epoch.load(Ordering::SeqCst) != epoch {
			return;
		}
		let queued: Vec<PathBuf> = {
			let mut updates = self.updates.lock();
			updates.enabled = Some(epoch);
			std::mem::take(&mut updates.pending).into()
		};
		debug!(address = %self.address, queued = queued.len(), "Debugger enabled");
		self.spawn_flush(queued, epoch);
	}

	fn on_disconnected(self: &Arc<Self>) {
		self.updates.lock().enabled = None;
		if !self.keep_alive.load(Ordering::SeqCst) {
			return;
		}
		self.set_state(SessionState::DisconnectedPendingRetry);
		info!(address = %self.address, delay = ?self.options.reconnect_delay, "Disconnected, will reconnect");
		self.schedule_reconnect();
	}

	/// Arms the reconnect timer, replacing any timer still pending.
	fn schedule_reconnect(self: &Arc<Self>) {
		let mut retry = self.retry.lock();
		if !self.keep_alive.load(Ordering::SeqCst) {
			return;
		}

		let token = retry.next_token;
		retry.next_token += 1;
		let weak = Arc::downgrade(self);
		let delay = self.options.reconnect_delay;
		let timer = tokio::spawn(async move {
			tokio::time::sleep(delay).await;
			if let Some(inner) = weak.upgrade() {
				inner.reconnect(token);
			}
		});

		if let Some((_, previous)) = retry.timer.replace((token, timer)) {
			previous.abort();
		}
	}

	fn reconnect(self: &Arc<Self>, token: u64) {
		let mut retry = self.retry.lock();
		match retry.timer {
			Some((current, _)) if current == token => retry.timer = None,
			_ => return,
		}
		if !self.keep_alive.load(Ordering::SeqCst) {
			return;
		}
		debug!(address = %self.address, "Reconnecting");
		self.connect();
	}

	fn stop(&self) {
		if !self.keep_alive.swap(false, Ordering::SeqCst) {
			return;
		}
		if let Some((_, timer)) = self.retry.lock().timer.take() {
			timer.abort();
		}
		self.protocol.disconnect();
		*self.state.lock() = SessionState::Stopped;

		self.scripts.lock().clear();
		*self.updates.lock() = UpdateQueue::default();
		self.registry.shutdown();
		if let Some(task) = self.file_events.lock().take() {
			task.abort();
		}
		info!(address = %self.address, "Tab session stopped");
	}

	fn on_script_parsed(&self, params: ScriptParsedParams) {
		if params.url.is_empty() || !self.keep_alive.load(Ordering::SeqCst) {
			return;
		}
		let Some(path) = self.mapper.resolve(&params.url) else {
			debug!(url = %params.url, "No local mapping for script");
			return;
		};

		debug!(path = %path.display(), script_id = %params.script_id, "Tracking script");
		self.scripts.lock().insert(
			path.clone(),
			ScriptRecord {
				url: params.url,
				script_id: params.script_id,
			},
		);
		if let Err(e) = self.registry.start_watching(&path) {
			warn!(path = %path.display(), error = %e, "Failed to watch script directory");
		}
	}

	fn on_global_object_cleared(&self) {
		let scripts = {
			let mut scripts = self.scripts.lock();
			let count = scripts.len();
			scripts.clear();
			count
		};
		self.updates.lock().pending.clear();
		let directories = self.registry.clear_all();
		info!(address = %self.address, scripts, directories, "Page reloaded, forgot scripts");
	}

	async fn on_file_modified(self: &Arc<Self>, path: PathBuf) {
		if !self.scripts.lock().contains_key(&path) {
			return;
		}
		// Same guard the enable reply drains the queue under.
		let epoch = {
			let mut updates = self.updates.lock();
			let enabled = updates.enabled;
			match enabled {
				Some(epoch) => epoch,
				None => {
					self.queue_locked(&mut updates, path);
					return;
				}
			}
		};
		self.push_update(path, epoch).await;
	}

	/// Reads `path` and sends its contents to the page over link `epoch`.
	async fn push_update(self: &Arc<Self>, path: PathBuf, epoch: u64) {
		let source = match tokio::fs::read_to_string(&path).await {
			Ok(source) => source,
			Err(e) => {
				warn!(path = %path.display(), error = %e, "Failed to read modified script");
				return;
			}
		};
		let Some(record) = self.scripts.lock().get(&path).cloned() else {
			debug!(path = %path.display(), "Script forgotten while reading");
			return;
		};

		let address = self.address.clone();
		let on_reply: ReplyCallback<SetScriptSourceResult> = Box::new(move |reply| {
			let path = reply.options.as_ref().and_then(|options| options["path"].as_str().map(str::to_string));
			match reply.data {
				Some(result) if !result.is_ok() => warn!(
					address = %address,
					path = path.as_deref().unwrap_or_default(),
					status = result.status.as_deref().unwrap_or_default(),
					exception = ?result.exception_details,
					"Browser rejected updated source"
				),
				_ => debug!(address = %address, id = reply.id, "Source update applied"),
			}
		});

		let command = SetScriptSource::new(record.script_id.clone(), source);
		let options = json!({ "path": path.display().to_string() });
		match self.protocol.send(command, Some(on_reply), Some(options)) {
			Ok(id) => info!(path = %path.display(), script_id = %record.script_id, id, "Pushed updated source"),
			Err(e) if e.is_transport() => {
				debug!(path = %path.display(), error = %e, "Link dropped, queueing update");
				self.requeue(path, epoch);
			}
			Err(e) => warn!(path = %path.display(), error = %e, "Failed to push updated source"),
		}
	}

	/// Queues an edit whose send over link `epoch` failed.
	fn requeue(self: &Arc<Self>, path: PathBuf, epoch: u64) {
		let mut updates = self.updates.lock();
		self.queue_locked(&mut updates, path);
		let enabled = updates.enabled;
		match enabled {
			Some(current) if current == epoch => updates.enabled = None,
			// A newer link is already enabled and will not flush again.
			Some(current) => {
				let queued: Vec<PathBuf> = std::mem::take(&mut updates.pending).into();
				drop(updates);
				self.spawn_flush(queued, current);
			}
			None => {}
		}
	}

	fn queue_locked(&self, updates: &mut UpdateQueue, path: PathBuf) {
		let max = self.options.max_pending_updates;
		if updates.pending.contains(&path) {
			return;
		}
		if max == 0 {
			warn!(path = %path.display(), "Disconnected, dropping update");
			return;
		}
		if updates.pending.len() >= max {
			if let Some(dropped) = updates.pending.pop_front() {
				warn!(path = %dropped.display(), "Pending update queue full, dropping oldest");
			}
		}
		debug!(path = %path.display(), "Queued update until the debugger is enabled");
		updates.pending.push_back(path);
	}

	fn spawn_flush(self: &Arc<Self>, queued: Vec<PathBuf>, epoch: u64) {
		if queued.is_empty() {
			return;
		}
		let inner = Arc::clone(self);
		tokio::spawn(async move { inner.flush(queued, epoch).await });
	}

	async fn flush(self: &Arc<Self>, queued: Vec<PathBuf>, epoch: u64) {
		info!(address = %self.address, count = queued.len(), "Sending updates made while disconnected");
		for path in queued {
			if self.scripts.lock().contains_key(&path) {
				self.push_update(path, epoch).await;
			}
		}
	}
}

async fn file_event_loop(inner: Weak<TabInner>, mut events: mpsc::UnboundedReceiver<PathBuf>) {
	while let Some(path) = events.recv().await {
		let Some(inner) = inner.upgrade() else {
			break;
		};
		inner.on_file_modified(path).await;
	}
}
