//! Command/notification multiplexer for one debugger connection.
//!
//! This module implements the request/response correlation layer on top of the transport.
//! It handles:
//! - Generating unique, monotonically increasing command IDs
//! - Correlating responses with pending commands
//! - Distinguishing notifications from responses
//! - Dispatching notifications to the subscribed handler for their method
//!
//! # Message Flow
//!
//! 1. Caller invokes [`Protocol::send`] (callback form) or [`Protocol::request`] (awaiting form)
//! 2. The protocol assigns the next ID and stores the pending command
//! 3. The request is serialized and queued to the link's writer task
//! 4. The link's reader task parses inbound frames into a channel
//! 5. The dispatch loop takes one message at a time, in arrival order
//! 6. Responses are matched by ID; notifications are matched by method name
//!
//! # Links
//!
//! Each [`Protocol::connect`] creates a new link (one transport plus its tasks).
//! The protocol itself outlives links: pending commands and subscriptions
//! survive a reconnect. A link replaced by a newer `connect` is torn down
//! silently, without firing its close callback.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chromesync_protocol::{Command, ErrorPayload, Event, Message, Notification, Request, Response};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::transport::{Connector, Transport, TransportParts};

/// How long a closing link waits for its writer to flush and close the socket.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Response handed to a completion callback.
#[derive(Debug)]
pub struct Reply<T> {
	/// Correlation ID the command was sent with.
	pub id: u64,
	/// Method name of the command.
	pub method: &'static str,
	/// Parsed result, `None` when the response carried no result.
	pub data: Option<T>,
	/// Options the caller passed to [`Protocol::send`].
	pub options: Option<Value>,
}

/// Completion callback for [`Protocol::send`].
pub type ReplyCallback<T> = Box<dyn FnOnce(Reply<T>) + Send>;

/// Error payload returned for a command sent with [`Protocol::send`].
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteError {
	pub id: u64,
	pub method: String,
	pub error: ErrorPayload,
}

impl fmt::Display for RemoteError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{} failed ({}): {}", self.method, self.error.code, self.error.message)
	}
}

/// Surfaces remote errors to the user. Must not block.
pub type ErrorReporter = Arc<dyn Fn(&RemoteError) + Send + Sync>;

/// Default reporter: logs the error.
pub fn log_remote_error(err: &RemoteError) {
	error!(id = err.id, method = %err.method, code = err.error.code, "{}", err.error.message);
}

/// Tunables for a [`Protocol`].
#[derive(Clone)]
pub struct ProtocolOptions {
	/// Limit for [`Protocol::request`]. `None` waits indefinitely.
	pub command_timeout: Option<Duration>,
	/// Where error payloads of [`Protocol::send`] commands are reported.
	pub reporter: ErrorReporter,
}

impl Default for ProtocolOptions {
	fn default() -> Self {
		Self {
			command_timeout: None,
			reporter: Arc::new(log_remote_error),
		}
	}
}

impl ProtocolOptions {
	pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
		self.command_timeout = Some(timeout);
		self
	}

	pub fn with_reporter(mut self, reporter: impl Fn(&RemoteError) + Send + Sync + 'static) -> Self {
		self.reporter = Arc::new(reporter);
		self
	}
}

impl fmt::Debug for ProtocolOptions {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ProtocolOptions")
			.field("command_timeout", &self.command_timeout)
			.finish_non_exhaustive()
	}
}

type Outcome = std::result::Result<Option<Value>, ErrorPayload>;

type NotificationHandler = Arc<dyn Fn(Option<Value>) + Send + Sync>;

/// A command awaiting its response.
struct PendingCommand {
	method: &'static str,
	/// Whether an error payload goes to the reporter (callback form) or back to the caller.
	report_errors: bool,
	on_reply: Box<dyn FnOnce(u64, Outcome) + Send>,
}

/// The live transport, if any.
struct Link {
	generation: u64,
	/// Set once the transport is open.
	outbound: Option<mpsc::UnboundedSender<Value>>,
	/// Dropping the link drops this sender, which ends the link task.
	_shutdown: oneshot::Sender<()>,
}

struct Shared {
	connector: Arc<dyn Connector>,
	options: ProtocolOptions,
	next_id: AtomicU64,
	generation: AtomicU64,
	commands: Mutex<HashMap<u64, PendingCommand>>,
	notifications: Mutex<HashMap<&'static str, NotificationHandler>>,
	link: Mutex<Option<Link>>,
}

impl Shared {
	fn outbound(&self) -> Option<mpsc::UnboundedSender<Value>> {
		self.link.lock().as_ref().and_then(|link| link.outbound.clone())
	}

	fn superseded(&self, generation: u64) -> bool {
		self.generation.load(Ordering::SeqCst) != generation
	}

	/// Marks the link open. Returns false if it was replaced or disconnected meanwhile.
	fn attach(&self, generation: u64, outbound: mpsc::UnboundedSender<Value>) -> bool {
		match self.link.lock().as_mut() {
			Some(link) if link.generation == generation => {
				link.outbound = Some(outbound);
				true
			}
			_ => false,
		}
	}

	/// Forgets the link if it is still the current one.
	fn release(&self, generation: u64) {
		let mut link = self.link.lock();
		if link.as_ref().is_some_and(|l| l.generation == generation) {
			*link = None;
		}
	}

	fn dispatch(&self, value: Value) {
		match Message::from_value(value) {
			Message::Event(Event { method, params }) => {
				let handler = self.notifications.lock().get(method.as_str()).cloned();
				match handler {
					Some(handler) => handler(params),
					None => debug!(method = %method, "Notification without subscriber (ignored)"),
				}
			}
			Message::Response(Response { id, result, error }) => {
				let Some(pending) = self.commands.lock().remove(&id) else {
					debug!(id, "Response for unknown command (ignored)");
					return;
				};

				let outcome = match error {
					Some(payload) => {
						if pending.report_errors {
							(self.options.reporter)(&RemoteError {
								id,
								method: pending.method.to_string(),
								error: payload.clone(),
							});
						}
						Err(payload)
					}
					None => Ok(result),
				};
				(pending.on_reply)(id, outcome);
			}
			Message::Unknown(value) => {
				debug!("Unknown message type (forward-compatible, ignored): {}", value);
			}
		}
	}
}

/// RAII guard removing a pending command when a [`Protocol::request`] future is dropped.
struct CancelGuard {
	id: u64,
	shared: Arc<Shared>,
	completed: bool,
}

impl Drop for CancelGuard {
	fn drop(&mut self) {
		if !self.completed && self.shared.commands.lock().remove(&self.id).is_some() {
			debug!(id = self.id, "CancelGuard: removed orphaned command");
		}
	}
}

/// Multiplexer for one debugger connection.
///
/// Cheap to clone; clones share the same pending commands, subscriptions and link.
#[derive(Clone)]
pub struct Protocol {
	shared: Arc<Shared>,
}

impl Protocol {
	pub fn new(connector: Arc<dyn Connector>) -> Self {
		Self::with_options(connector, ProtocolOptions::default())
	}

	pub fn with_options(connector: Arc<dyn Connector>, options: ProtocolOptions) -> Self {
		Self {
			shared: Arc::new(Shared {
				connector,
				options,
				next_id: AtomicU64::new(0),
				generation: AtomicU64::new(0),
				commands: Mutex::new(HashMap::new()),
				notifications: Mutex::new(HashMap::new()),
				link: Mutex::new(None),
			}),
		}
	}

	/// Opens a transport to `address` on a background task.
	///
	/// Returns immediately. `on_open` runs once the transport is open; `on_close`
	/// runs when it closes or when the attempt fails. An existing link is torn
	/// down first. Must be called from within a tokio runtime.
	pub fn connect<O, C>(&self, address: impl Into<String>, on_open: O, on_close: C)
	where
		O: FnOnce() + Send + 'static,
		C: FnOnce() + Send + 'static,
	{
		let address = address.into();
		let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
		let (shutdown_tx, shutdown_rx) = oneshot::channel();

		let previous = self.shared.link.lock().replace(Link {
			generation,
			outbound: None,
			_shutdown: shutdown_tx,
		});
		if let Some(previous) = previous {
			debug!(address = %address, previous = previous.generation, "Tearing down previous transport");
		}

		debug!(address = %address, generation, "Connecting");
		tokio::spawn(run_link(
			Arc::clone(&self.shared),
			generation,
			address,
			Box::new(on_open),
			Box::new(on_close),
			shutdown_rx,
		));
	}

	/// Closes the transport. Returns false when there was nothing to close.
	pub fn disconnect(&self) -> bool {
		match self.shared.link.lock().take() {
			Some(link) => {
				debug!(generation = link.generation, "Disconnecting");
				true
			}
			None => {
				debug!("Disconnect requested while not connected (no-op)");
				false
			}
		}
	}

	/// Returns true while a transport is open.
	pub fn is_connected(&self) -> bool {
		self.shared.outbound().is_some()
	}

	/// Sends a command, invoking `callback` when its response arrives.
	///
	/// Returns the command's correlation ID. Fails with [`Error::NotConnected`]
	/// before the transport has opened. An error response is passed to the
	/// reporter instead of the callback.
	pub fn send<C: Command>(&self, command: C, callback: Option<ReplyCallback<C::Output>>, options: Option<Value>) -> Result<u64> {
		let params = serde_json::to_value(&command)?;
		let pending = PendingCommand {
			method: C::METHOD,
			report_errors: true,
			on_reply: Box::new(move |id, outcome| {
				let Ok(result) = outcome else {
					return;
				};
				let data = result.and_then(|value| match serde_json::from_value::<C::Output>(value) {
					Ok(parsed) => Some(parsed),
					Err(e) => {
						warn!(id, method = C::METHOD, error = %e, "Failed to parse command result");
						None
					}
				});
				if let Some(callback) = callback {
					callback(Reply {
						id,
						method: C::METHOD,
						data,
						options,
					});
				}
			}),
		};
		self.enqueue(C::METHOD, params, pending)
	}

	/// Sends a command and waits for its parsed result.
	///
	/// Honors [`ProtocolOptions::command_timeout`]; without one the wait is unbounded.
	pub async fn request<C: Command>(&self, command: C) -> Result<C::Output> {
		let params = serde_json::to_value(&command)?;
		let (tx, rx) = oneshot::channel();
		let pending = PendingCommand {
			method: C::METHOD,
			report_errors: false,
			on_reply: Box::new(move |_, outcome| {
				let _ = tx.send(outcome);
			}),
		};
		let id = self.enqueue(C::METHOD, params, pending)?;
		let mut guard = CancelGuard {
			id,
			shared: Arc::clone(&self.shared),
			completed: false,
		};

		let received = match self.shared.options.command_timeout {
			Some(limit) => tokio::time::timeout(limit, rx)
				.await
				.map_err(|_| Error::Timeout(format!("{} (id={}) got no response within {:?}", C::METHOD, id, limit)))?,
			None => rx.await,
		};
		guard.completed = true;

		match received.map_err(|_| Error::ChannelClosed)? {
			Ok(result) => {
				let value = result.unwrap_or_else(|| Value::Object(Default::default()));
				Ok(serde_json::from_value(value)?)
			}
			Err(payload) => Err(Error::Remote {
				method: C::METHOD.to_string(),
				code: payload.code,
				message: payload.message,
			}),
		}
	}

	/// Registers the handler for notification `N`, replacing any previous one.
	///
	/// The callback receives `None` when the notification carries no params.
	pub fn subscribe<N, F>(&self, callback: F)
	where
		N: Notification,
		F: Fn(Option<N::Params>) + Send + Sync + 'static,
	{
		let handler: NotificationHandler = Arc::new(move |params: Option<Value>| {
			let parsed = match params {
				Some(value) => match serde_json::from_value::<N::Params>(value) {
					Ok(parsed) => Some(parsed),
					Err(e) => {
						warn!(method = N::METHOD, error = %e, "Dropping notification with unexpected params");
						return;
					}
				},
				None => None,
			};
			callback(parsed);
		});

		if self.shared.notifications.lock().insert(N::METHOD, handler).is_some() {
			debug!(method = N::METHOD, "Replaced existing subscription");
		}
	}

	/// Removes the handler for notification `N`. Returns false if none was registered.
	pub fn unsubscribe<N: Notification>(&self) -> bool {
		self.shared.notifications.lock().remove(N::METHOD).is_some()
	}

	/// Number of commands still awaiting a response.
	pub fn pending_commands(&self) -> usize {
		self.shared.commands.lock().len()
	}

	fn enqueue(&self, method: &'static str, params: Value, pending: PendingCommand) -> Result<u64> {
		let outbound = self.shared.outbound().ok_or(Error::NotConnected)?;
		let id = self.shared.next_id.fetch_add(1, Ordering::SeqCst);
		let request = serde_json::to_value(Request {
			id,
			method: method.to_string(),
			params,
		})?;

		self.shared.commands.lock().insert(id, pending);
		debug!(id, method, "Sending command");

		if outbound.send(request).is_err() {
			self.shared.commands.lock().remove(&id);
			return Err(Error::NotConnected);
		}
		Ok(id)
	}

	/// Dispatch an incoming message (test-only)
	#[cfg(test)]
	pub(crate) fn dispatch(&self, value: Value) {
		self.shared.dispatch(value);
	}
}

/// Drives one link: connect, then dispatch inbound messages until either side closes.
async fn run_link(
	shared: Arc<Shared>,
	generation: u64,
	address: String,
	on_open: Box<dyn FnOnce() + Send>,
	on_close: Box<dyn FnOnce() + Send>,
	mut shutdown_rx: oneshot::Receiver<()>,
) {
	let connected = tokio::select! {
		result = shared.connector.connect(&address) => result,
		_ = &mut shutdown_rx => {
			debug!(address = %address, "Connection attempt abandoned");
			if !shared.superseded(generation) {
				on_close();
			}
			return;
		}
	};

	let TransportParts {
		sender,
		receiver,
		mut message_rx,
	} = match connected {
		Ok(parts) => parts,
		Err(e) => {
			warn!(address = %address, error = %e, "Connection failed");
			shared.release(generation);
			if !shared.superseded(generation) {
				on_close();
			}
			return;
		}
	};

	let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
	if !shared.attach(generation, outbound_tx) {
		debug!(address = %address, "Link replaced before it opened");
		return;
	}

	info!(address = %address, "Transport opened");
	on_open();

	let reader = tokio::spawn(async move {
		if let Err(e) = receiver.run().await {
			warn!("Transport read error: {}", e);
		}
	});
	let writer = tokio::spawn(write_loop(sender, outbound_rx));

	loop {
		tokio::select! {
			biased;
			_ = &mut shutdown_rx => {
				debug!(address = %address, "Disconnect requested");
				break;
			}
			inbound = message_rx.recv() => match inbound {
				Some(value) => shared.dispatch(value),
				None => {
					debug!(address = %address, "Transport closed by peer");
					break;
				}
			}
		}
	}

	// Releasing drops the outbound sender, which lets the writer close the socket.
	shared.release(generation);
	reader.abort();
	if tokio::time::timeout(CLOSE_TIMEOUT, writer).await.is_err() {
		debug!(address = %address, "Writer did not finish closing in time");
	}

	info!(address = %address, "Transport closed");
	if !shared.superseded(generation) {
		on_close();
	}
}

async fn write_loop(mut sender: Box<dyn Transport>, mut outbound_rx: mpsc::UnboundedReceiver<Value>) {
	while let Some(message) = outbound_rx.recv().await {
		if let Err(e) = sender.send(message).await {
			error!("Transport write error: {}", e);
			break;
		}
	}
	if let Err(e) = sender.close().await {
		debug!("Transport close error: {}", e);
	}
}

#[cfg(test)]
mod tests;
