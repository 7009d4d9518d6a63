//! Transport layer for the debugger connection.
//!
//! A transport is split into three parts so the connection can run reading,
//! writing and dispatch on separate tasks:
//!
//! - [`Transport`]: the write half, owned by the writer task
//! - [`TransportReceiver`]: the read half, pumping parsed JSON values into a channel
//! - `message_rx`: the receiving end of that channel, drained by the dispatch loop
//!
//! The channel closes when the peer goes away, which is how the connection
//! notices a disconnect.

use std::future::Future;
use std::pin::Pin;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};
use tokio_tungstenite::{WebSocketStream, connect_async};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Boxed future used at the trait seams.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Write half of a transport.
pub trait Transport: Send {
	/// Serializes and writes one message.
	fn send(&mut self, message: Value) -> BoxFuture<'_, Result<()>>;

	/// Closes the connection. Closing an already closed transport is not an error.
	fn close(&mut self) -> BoxFuture<'_, Result<()>>;
}

/// Read half of a transport.
pub trait TransportReceiver: Send {
	/// Reads until the peer closes, forwarding every message to `message_rx`.
	fn run(self: Box<Self>) -> BoxFuture<'static, Result<()>>;
}

/// An opened transport, ready to be driven by a connection.
pub struct TransportParts {
	pub sender: Box<dyn Transport>,
	pub receiver: Box<dyn TransportReceiver>,
	pub message_rx: mpsc::UnboundedReceiver<Value>,
}

/// Opens transports to debugger addresses.
pub trait Connector: Send + Sync + 'static {
	fn connect<'a>(&'a self, address: &'a str) -> BoxFuture<'a, Result<TransportParts>>;
}

/// Connects to `ws://` / `wss://` debugger addresses.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

impl WebSocketConnector {
	pub fn new() -> Self {
		Self
	}
}

impl Connector for WebSocketConnector {
	fn connect<'a>(&'a self, address: &'a str) -> BoxFuture<'a, Result<TransportParts>> {
		Box::pin(async move {
			let (stream, response) = connect_async(address).await.map_err(|e| Error::ConnectionFailed {
				address: address.to_string(),
				message: e.to_string(),
			})?;
			debug!(address, status = %response.status(), "WebSocket handshake complete");
			Ok(WebSocketTransport::new(stream).into_parts())
		})
	}
}

/// JSON-over-WebSocket transport.
///
/// Generic over the underlying stream so tests can run it over an in-process
/// duplex pipe.
pub struct WebSocketTransport<S> {
	stream: WebSocketStream<S>,
}

impl<S> WebSocketTransport<S>
where
	S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
	pub fn new(stream: WebSocketStream<S>) -> Self {
		Self { stream }
	}

	/// Splits the socket into sender, receiver and inbound message channel.
	pub fn into_parts(self) -> TransportParts {
		let (sink, stream) = self.stream.split();
		let (message_tx, message_rx) = mpsc::unbounded_channel();
		TransportParts {
			sender: Box::new(WebSocketTransportSender { sink }),
			receiver: Box::new(WebSocketTransportReceiver { stream, message_tx }),
			message_rx,
		}
	}
}

/// Write half of [`WebSocketTransport`].
pub struct WebSocketTransportSender<S> {
	sink: SplitSink<WebSocketStream<S>, WsMessage>,
}

impl<S> Transport for WebSocketTransportSender<S>
where
	S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
	fn send(&mut self, message: Value) -> BoxFuture<'_, Result<()>> {
		Box::pin(async move {
			let text = serde_json::to_string(&message)?;
			self.sink
				.send(WsMessage::Text(text))
				.await
				.map_err(|e| Error::TransportError(format!("Failed to write frame: {e}")))
		})
	}

	fn close(&mut self) -> BoxFuture<'_, Result<()>> {
		Box::pin(async move {
			match self.sink.close().await {
				Ok(()) | Err(tungstenite::Error::ConnectionClosed) | Err(tungstenite::Error::AlreadyClosed) => Ok(()),
				Err(e) => Err(Error::TransportError(format!("Failed to close socket: {e}"))),
			}
		})
	}
}

/// Read half of [`WebSocketTransport`].
pub struct WebSocketTransportReceiver<S> {
	stream: SplitStream<WebSocketStream<S>>,
	message_tx: mpsc::UnboundedSender<Value>,
}

impl<S> WebSocketTransportReceiver<S> {
	/// Forwards a parsed frame. Returns false once nobody is listening.
	fn forward(&self, parsed: serde_json::Result<Value>) -> bool {
		match parsed {
			Ok(value) => self.message_tx.send(value).is_ok(),
			Err(e) => {
				warn!(error = %e, "Dropping malformed frame");
				true
			}
		}
	}
}

impl<S> TransportReceiver for WebSocketTransportReceiver<S>
where
	S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
	fn run(mut self: Box<Self>) -> BoxFuture<'static, Result<()>> {
		Box::pin(async move {
			while let Some(frame) = self.stream.next().await {
				let keep_reading = match frame {
					Ok(WsMessage::Text(text)) => self.forward(serde_json::from_str(&text)),
					Ok(WsMessage::Binary(bytes)) => self.forward(serde_json::from_slice(&bytes)),
					Ok(WsMessage::Close(frame)) => {
						debug!(?frame, "Peer closed the socket");
						false
					}
					Ok(_) => true,
					Err(tungstenite::Error::ConnectionClosed) => false,
					Err(e) => return Err(Error::TransportError(format!("Failed to read frame: {e}"))),
				};
				if !keep_reading {
					break;
				}
			}
			Ok(())
		})
	}
}
