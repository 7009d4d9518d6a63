//! Error types for the chromesync runtime.

use thiserror::Error;

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the chromesync runtime.
#[derive(Debug, Error)]
pub enum Error {
	/// Failed to establish the debugger connection.
	#[error("Failed to connect to {address}: {message}")]
	ConnectionFailed { address: String, message: String },

	/// Transport-level error (WebSocket read/write).
	#[error("Transport error: {0}")]
	TransportError(String),

	/// A command was sent before the transport opened (or after it closed).
	#[error("Not connected: transport is not open")]
	NotConnected,

	/// Channel closed unexpectedly.
	#[error("Channel closed unexpectedly")]
	ChannelClosed,

	/// Error payload returned by the remote side for a command.
	#[error("{method} failed ({code}): {message}")]
	Remote { method: String, code: i64, message: String },

	/// Tab enumeration failed.
	#[error("Tab discovery failed: {0}")]
	Discovery(String),

	/// Timeout waiting for a command response.
	#[error("Timeout: {0}")]
	Timeout(String),

	/// Filesystem watch could not be installed or removed.
	#[error("File watch error: {0}")]
	Watch(#[from] notify::Error),

	/// I/O error.
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	/// JSON serialization/deserialization error.
	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),
}

impl Error {
	/// Returns true if this is a timeout error.
	pub fn is_timeout(&self) -> bool {
		matches!(self, Error::Timeout(_))
	}

	/// Returns true for failures of the connection itself, which the session
	/// layer recovers from by reconnecting.
	pub fn is_transport(&self) -> bool {
		matches!(
			self,
			Error::ConnectionFailed { .. } | Error::TransportError(_) | Error::NotConnected | Error::ChannelClosed
		)
	}
}
