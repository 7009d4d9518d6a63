//! Fleet of tab sessions for one browser instance.
//!
//! [`ChromeWatch`] polls a [`TabSource`] and keeps exactly one [`TabWatch`]
//! per debuggable page, keyed by debugger address.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chromesync_protocol::TabDescriptor;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::path_map::PathMapper;
use crate::tab::{SessionOptions, SessionState, TabWatch};
use crate::transport::{BoxFuture, Connector};
use crate::watch::WatcherFactory;

/// Enumerates the browser's open tabs.
pub trait TabSource: Send + Sync + 'static {
	fn list_tabs(&self) -> BoxFuture<'_, Result<Vec<TabDescriptor>>>;
}

/// Tunables for a [`ChromeWatch`].
#[derive(Debug, Clone)]
pub struct FleetOptions {
	pub poll_interval: Duration,
	/// Stop sessions whose tab no longer shows up in the enumeration.
	pub retire_closed_tabs: bool,
	pub session: SessionOptions,
}

impl Default for FleetOptions {
	fn default() -> Self {
		Self {
			poll_interval: Duration::from_secs(5),
			retire_closed_tabs: true,
			session: SessionOptions::default(),
		}
	}
}

/// Outcome of one [`ChromeWatch::poll_once`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollSummary {
	/// Debugger addresses of sessions started.
	pub started: Vec<String>,
	/// Debugger addresses of sessions retired.
	pub retired: Vec<String>,
}

struct Session {
	tab_id: String,
	watch: TabWatch,
}

struct FleetInner {
	tab_source: Arc<dyn TabSource>,
	mapper: Arc<PathMapper>,
	connector: Arc<dyn Connector>,
	watchers: Arc<dyn WatcherFactory>,
	options: FleetOptions,
	sessions: Mutex<HashMap<String, Session>>,
	stopped: AtomicBool,
	poller: Mutex<Option<JoinHandle<()>>>,
}

/// Session manager for every debuggable tab of one browser.
///
/// Dropping the fleet stops it.
pub struct ChromeWatch {
	inner: Arc<FleetInner>,
}

impl ChromeWatch {
	/// Creates a fleet without starting the polling loop.
	pub fn new(
		tab_source: Arc<dyn TabSource>,
		mapper: Arc<PathMapper>,
		connector: Arc<dyn Connector>,
		watchers: Arc<dyn WatcherFactory>,
		options: FleetOptions,
	) -> Self {
		Self {
			inner: Arc::new(FleetInner {
				tab_source,
				mapper,
				connector,
				watchers,
				options,
				sessions: Mutex::new(HashMap::new()),
				stopped: AtomicBool::new(false),
				poller: Mutex::new(None),
			}),
		}
	}

	/// Creates a fleet and starts polling; the first poll happens immediately.
	pub fn start(
		tab_source: Arc<dyn TabSource>,
		mapper: Arc<PathMapper>,
		connector: Arc<dyn Connector>,
		watchers: Arc<dyn WatcherFactory>,
		options: FleetOptions,
	) -> Self {
		let fleet = Self::new(tab_source, mapper, connector, watchers, options);
		fleet.spawn_poller();
		fleet
	}

	fn spawn_poller(&self) {
		let weak = Arc::downgrade(&self.inner);
		let period = self.inner.options.poll_interval;
		let task = tokio::spawn(async move {
			let mut ticker = tokio::time::interval(period);
			ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
			loop {
				ticker.tick().await;
				let Some(inner) = weak.upgrade() else {
					break;
				};
				if inner.stopped.load(Ordering::SeqCst) {
					break;
				}
				if let Err(e) = inner.poll_once().await {
					warn!(error = %e, "Tab enumeration failed");
				}
			}
		});
		*self.inner.poller.lock() = Some(task);
	}

	/// Enumerates tabs once, starting and retiring sessions as needed.
	///
	/// An enumeration error leaves every session as it was.
	pub async fn poll_once(&self) -> Result<PollSummary> {
		self.inner.poll_once().await
	}

	/// Halts polling and stops every session. Safe to call more than once.
	pub fn stop(&self) {
		self.inner.stop();
	}

	/// Debugger addresses with a live session, sorted.
	pub fn addresses(&self) -> Vec<String> {
		let mut addresses: Vec<String> = self.inner.sessions.lock().keys().cloned().collect();
		addresses.sort();
		addresses
	}

	pub fn session_state(&self, address: &str) -> Option<SessionState> {
		self.inner.sessions.lock().get(address).map(|session| session.watch.state())
	}

	pub fn len(&self) -> usize {
		self.inner.sessions.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

impl Drop for ChromeWatch {
	fn drop(&mut self) {
		self.inner.stop();
	}
}

impl FleetInner {
	async fn poll_once(&self) -> Result<PollSummary> {
		let mut summary = PollSummary::default();
		if self.stopped.load(Ordering::SeqCst) {
			return Ok(summary);
		}

		let tabs = self.tab_source.list_tabs().await?;
		debug!(count = tabs.len(), "Enumerated tabs");

		if self.options.retire_closed_tabs {
			// A tab we are attached to loses its debugger URL but keeps its id.
			let open: HashSet<&str> = tabs.iter().map(|tab| tab.id.as_str()).collect();
			let retired: Vec<(String, Session)> = {
				let mut sessions = self.sessions.lock();
				let closed: Vec<String> = sessions
					.iter()
					.filter(|(_, session)| !open.contains(session.tab_id.as_str()))
					.map(|(address, _)| address.clone())
					.collect();
				closed
					.into_iter()
					.filter_map(|address| sessions.remove(&address).map(|session| (address, session)))
					.collect()
			};
			for (address, session) in retired {
				info!(address = %address, tab_id = %session.tab_id, "Tab closed, stopping session");
				session.watch.stop();
				summary.retired.push(address);
			}
		}

		for tab in &tabs {
			let Some(address) = tab.debugger_address() else {
				continue;
			};
			if self.sessions.lock().contains_key(address) {
				continue;
			}

			let file_watch = match self.watchers.create() {
				Ok(file_watch) => file_watch,
				Err(e) => {
					warn!(address, error = %e, "Failed to create file watcher");
					continue;
				}
			};
			let watch = TabWatch::start(
				address,
				Arc::clone(&self.mapper),
				Arc::clone(&self.connector),
				file_watch,
				self.options.session.clone(),
			);

			let mut sessions = self.sessions.lock();
			if self.stopped.load(Ordering::SeqCst) || sessions.contains_key(address) {
				drop(sessions);
				watch.stop();
				continue;
			}
			sessions.insert(
				address.to_string(),
				Session {
					tab_id: tab.id.clone(),
					watch,
				},
			);
			info!(address, tab_id = %tab.id, title = %tab.title, "Watching new tab");
			summary.started.push(address.to_string());
		}

		Ok(summary)
	}

	fn stop(&self) {
		if self.stopped.swap(true, Ordering::SeqCst) {
			return;
		}
		if let Some(poller) = self.poller.lock().take() {
			poller.abort();
		}
		let sessions: Vec<Session> = self.sessions.lock().drain().map(|(_, session)| session).collect();
		for session in &sessions {
			session.watch.stop();
		}
		info!(count = sessions.len(), "Stopped watching tabs");
	}
}
