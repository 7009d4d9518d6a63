//! chromesync runtime - debugger connections, tab sessions and file watching
//!
//! This crate keeps the scripts of open browser tabs in sync with local files:
//!
//! - **Transport**: JSON messages over the tab's debugger WebSocket
//! - **Connection**: command/response correlation and notification dispatch
//! - **Path mapping**: script URL to local file resolution
//! - **Watching**: ref-counted directory watches for loaded scripts
//! - **Tab sessions**: per-tab state machine with reconnect
//! - **Fleet**: one session per debuggable tab, discovered by polling
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐
//! │ ChromeWatch  │  polls TabSource, owns sessions
//! └──────┬───────┘
//!        │ one per tab
//! ┌──────▼───────┐     ┌───────────────┐
//! │   TabWatch   │────▶│ WatchRegistry │  directory watches
//! │              │     └───────────────┘
//! │              │     ┌───────────────┐
//! │              │────▶│  PathMapper   │  URL → path
//! └──────┬───────┘     └───────────────┘
//!        │
//! ┌──────▼───────┐
//! │   Protocol   │  ids, pending commands, subscriptions
//! └──────┬───────┘
//!        │
//! ┌──────▼───────┐
//! │  Transport   │  WebSocket
//! └──────────────┘
//! ```

pub mod connection;
pub mod error;
pub mod fleet;
pub mod path_map;
pub mod tab;
pub mod transport;
pub mod watch;

#[cfg(test)]
pub(crate) mod testing;

// Re-export key types at crate root
pub use connection::{ErrorReporter, Protocol, ProtocolOptions, RemoteError, Reply, ReplyCallback, log_remote_error};
pub use error::{Error, Result};
pub use fleet::{ChromeWatch, FleetOptions, PollSummary, TabSource};
pub use path_map::{Mapping, PathMapper};
pub use tab::{ScriptRecord, SessionOptions, SessionState, TabWatch};
pub use transport::{
	BoxFuture, Connector, Transport, TransportParts, TransportReceiver, WebSocketConnector, WebSocketTransport,
	WebSocketTransportReceiver, WebSocketTransportSender,
};
pub use watch::{DirectoryWatcher, FileWatch, NotifyWatcher, NotifyWatcherFactory, WatchRegistry, WatcherFactory};
