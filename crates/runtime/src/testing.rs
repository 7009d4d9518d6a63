//! In-memory collaborators for tests.

use std::collections::BTreeSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use chromesync_protocol::TabDescriptor;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::fleet::TabSource;
use crate::transport::{BoxFuture, Connector, Transport, TransportParts, TransportReceiver};
use crate::watch::{DirectoryWatcher, FileWatch, WatcherFactory};

/// Connector producing in-process links; the remote end of each is handed out as a [`RemotePeer`].
pub(crate) struct MemoryConnector {
	attempts: AtomicUsize,
	refuse: AtomicBool,
	peers: mpsc::UnboundedSender<RemotePeer>,
}

impl MemoryConnector {
	pub(crate) fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<RemotePeer>) {
		let (peers, peers_rx) = mpsc::unbounded_channel();
		let connector = Arc::new(Self {
			attempts: AtomicUsize::new(0),
			refuse: AtomicBool::new(false),
			peers,
		});
		(connector, peers_rx)
	}

	/// Number of connection attempts so far.
	pub(crate) fn attempts(&self) -> usize {
		self.attempts.load(Ordering::SeqCst)
	}

	/// Makes subsequent attempts fail as if the port were closed.
	pub(crate) fn refuse(&self, refuse: bool) {
		self.refuse.store(refuse, Ordering::SeqCst);
	}
}

impl Connector for MemoryConnector {
	fn connect<'a>(&'a self, address: &'a str) -> BoxFuture<'a, Result<TransportParts>> {
		Box::pin(async move {
			self.attempts.fetch_add(1, Ordering::SeqCst);
			if self.refuse.load(Ordering::SeqCst) {
				return Err(Error::ConnectionFailed {
					address: address.to_string(),
					message: "connection refused".to_string(),
				});
			}

			let (outgoing, from_client) = mpsc::unbounded_channel();
			let (to_client, incoming) = mpsc::unbounded_channel();
			let (message_tx, message_rx) = mpsc::unbounded_channel();

			self.peers
				.send(RemotePeer {
					address: address.to_string(),
					from_client,
					to_client: Some(to_client),
				})
				.map_err(|_| Error::ChannelClosed)?;

			Ok(TransportParts {
				sender: Box::new(MemorySender { outgoing }),
				receiver: Box::new(MemoryReceiver { incoming, message_tx }),
				message_rx,
			})
		})
	}
}

struct MemorySender {
	outgoing: mpsc::UnboundedSender<Value>,
}

impl Transport for MemorySender {
	fn send(&mut self, message: Value) -> BoxFuture<'_, Result<()>> {
		let result = self
			.outgoing
			.send(message)
			.map_err(|_| Error::TransportError("peer gone".to_string()));
		Box::pin(async move { result })
	}

	fn close(&mut self) -> BoxFuture<'_, Result<()>> {
		Box::pin(async { Ok(()) })
	}
}

struct MemoryReceiver {
	incoming: mpsc::UnboundedReceiver<Value>,
	message_tx: mpsc::UnboundedSender<Value>,
}

impl TransportReceiver for MemoryReceiver {
	fn run(mut self: Box<Self>) -> BoxFuture<'static, Result<()>> {
		Box::pin(async move {
			while let Some(message) = self.incoming.recv().await {
				if self.message_tx.send(message).is_err() {
					break;
				}
			}
			Ok(())
		})
	}
}

/// The browser side of one in-memory link.
pub(crate) struct RemotePeer {
	pub(crate) address: String,
	from_client: mpsc::UnboundedReceiver<Value>,
	to_client: Option<mpsc::UnboundedSender<Value>>,
}

impl RemotePeer {
	/// Next command written by the client, `None` once the client closed the link.
	pub(crate) async fn next_request(&mut self) -> Option<Value> {
		self.from_client.recv().await
	}

	/// Next command, failing the test if none arrives soon.
	pub(crate) async fn expect_request(&mut self) -> Value {
		tokio::time::timeout(Duration::from_secs(5), self.next_request())
			.await
			.expect("timed out waiting for a command")
			.expect("client closed the link")
	}

	/// Commands already written, without waiting.
	pub(crate) fn drain_requests(&mut self) -> Vec<Value> {
		std::iter::from_fn(|| self.from_client.try_recv().ok()).collect()
	}

	pub(crate) fn push(&self, message: Value) {
		if let Some(to_client) = &self.to_client {
			let _ = to_client.send(message);
		}
	}

	pub(crate) fn notify(&self, method: &str, params: Value) {
		self.push(json!({ "method": method, "params": params }));
	}

	pub(crate) fn respond(&self, id: u64, result: Value) {
		self.push(json!({ "id": id, "result": result }));
	}

	pub(crate) fn respond_error(&self, id: u64, code: i64, message: &str) {
		self.push(json!({ "id": id, "error": { "code": code, "message": message } }));
	}

	/// Closes the link from the browser side.
	pub(crate) fn hang_up(&mut self) {
		self.to_client = None;
	}
}

/// Waits for the next link to be opened.
pub(crate) async fn next_peer(peers: &mut mpsc::UnboundedReceiver<RemotePeer>) -> RemotePeer {
	tokio::time::timeout(Duration::from_secs(5), peers.recv())
		.await
		.expect("timed out waiting for a connection")
		.expect("connector dropped")
}

/// Shared view of what a [`RecordingWatcher`] has been asked to do.
#[derive(Default)]
pub(crate) struct WatchProbe {
	active: Mutex<BTreeSet<PathBuf>>,
	installs: AtomicUsize,
	fail: Mutex<Option<PathBuf>>,
}

impl WatchProbe {
	pub(crate) fn active(&self) -> Vec<PathBuf> {
		self.active.lock().iter().cloned().collect()
	}

	pub(crate) fn installs(&self) -> usize {
		self.installs.load(Ordering::SeqCst)
	}

	/// Makes watching `directory` fail.
	pub(crate) fn fail_on(&self, directory: impl Into<PathBuf>) {
		*self.fail.lock() = Some(directory.into());
	}
}

/// [`DirectoryWatcher`] that only records calls.
pub(crate) struct RecordingWatcher {
	probe: Arc<WatchProbe>,
}

impl RecordingWatcher {
	pub(crate) fn new() -> (Self, Arc<WatchProbe>) {
		let probe = Arc::new(WatchProbe::default());
		(Self { probe: Arc::clone(&probe) }, probe)
	}
}

impl DirectoryWatcher for RecordingWatcher {
	fn watch(&mut self, directory: &Path) -> Result<()> {
		if self.probe.fail.lock().as_deref() == Some(directory) {
			return Err(Error::Io(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "watch refused")));
		}
		self.probe.installs.fetch_add(1, Ordering::SeqCst);
		self.probe.active.lock().insert(directory.to_path_buf());
		Ok(())
	}

	fn unwatch(&mut self, directory: &Path) -> Result<()> {
		self.probe.active.lock().remove(directory);
		Ok(())
	}
}

/// A recording [`FileWatch`] plus the sender used to fake modify events.
pub(crate) fn recording_watch() -> (FileWatch, Arc<WatchProbe>, mpsc::UnboundedSender<PathBuf>) {
	let (watcher, probe) = RecordingWatcher::new();
	let (events_tx, events) = mpsc::unbounded_channel();
	let watch = FileWatch {
		watcher: Box::new(watcher),
		events,
	};
	(watch, probe, events_tx)
}

/// Hands out recording watches, keeping their event senders.
#[derive(Default)]
pub(crate) struct RecordingWatcherFactory {
	created: Mutex<Vec<(Arc<WatchProbe>, mpsc::UnboundedSender<PathBuf>)>>,
}

impl RecordingWatcherFactory {
	pub(crate) fn created(&self) -> usize {
		self.created.lock().len()
	}
}

impl WatcherFactory for RecordingWatcherFactory {
	fn create(&self) -> Result<FileWatch> {
		let (watch, probe, events_tx) = recording_watch();
		self.created.lock().push((probe, events_tx));
		Ok(watch)
	}
}

/// [`TabSource`] returning whatever the test last configured.
pub(crate) struct StaticTabSource {
	tabs: Mutex<std::result::Result<Vec<TabDescriptor>, String>>,
	calls: AtomicUsize,
}

impl StaticTabSource {
	pub(crate) fn new(tabs: Vec<TabDescriptor>) -> Arc<Self> {
		Arc::new(Self {
			tabs: Mutex::new(Ok(tabs)),
			calls: AtomicUsize::new(0),
		})
	}

	pub(crate) fn set_tabs(&self, tabs: Vec<TabDescriptor>) {
		*self.tabs.lock() = Ok(tabs);
	}

	pub(crate) fn fail(&self, message: &str) {
		*self.tabs.lock() = Err(message.to_string());
	}

	pub(crate) fn calls(&self) -> usize {
		self.calls.load(Ordering::SeqCst)
	}
}

impl TabSource for StaticTabSource {
	fn list_tabs(&self) -> BoxFuture<'_, Result<Vec<TabDescriptor>>> {
		self.calls.fetch_add(1, Ordering::SeqCst);
		let tabs = self.tabs.lock().clone().map_err(Error::Discovery);
		Box::pin(async move { tabs })
	}
}

/// A debuggable page tab.
pub(crate) fn page(id: &str) -> TabDescriptor {
	TabDescriptor {
		id: id.to_string(),
		kind: "page".to_string(),
		title: format!("Tab {id}"),
		url: format!("http://localhost/{id}.html"),
		web_socket_debugger_url: Some(format!("ws://localhost:9222/devtools/page/{id}")),
		devtools_frontend_url: None,
	}
}

/// Yields to other tasks until `condition` holds, giving up after a while.
///
/// Sleeps in small steps, so under a paused clock virtual time advances too.
pub(crate) async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
	for _ in 0..500 {
		if condition() {
			return true;
		}
		tokio::time::sleep(Duration::from_millis(5)).await;
	}
	condition()
}

/// Lets already-runnable tasks make progress without advancing time.
pub(crate) async fn settle() {
	for _ in 0..50 {
		tokio::task::yield_now().await;
	}
}

/// Runs `future` with a generous upper bound.
pub(crate) async fn within<F: Future>(future: F) -> F::Output {
	tokio::time::timeout(Duration::from_secs(5), future)
		.await
		.expect("timed out")
}
