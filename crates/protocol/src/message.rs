//! Message envelopes and the typed command/notification traits.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An outbound command.
///
/// The command value itself serializes to the `params` object of the request.
/// Its [`Output`](Self::Output) type is how the `result` payload is parsed.
pub trait Command: Serialize + Send + 'static {
	/// Fully qualified method name (e.g. `Debugger.enable`).
	const METHOD: &'static str;

	/// Parsed shape of the `result` payload.
	type Output: DeserializeOwned + Send + 'static;
}

/// An inbound notification the remote side pushes without a request.
pub trait Notification: 'static {
	/// Fully qualified method name (e.g. `Debugger.scriptParsed`).
	const METHOD: &'static str;

	/// Parsed shape of the `params` payload.
	type Params: DeserializeOwned + Send + 'static;
}

/// Request sent to the remote side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
	/// Correlation id, echoed back in the response.
	pub id: u64,
	/// Method name to invoke.
	pub method: String,
	/// Method parameters as a JSON object.
	pub params: Value,
}

/// Response to a previously sent [`Request`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
	/// Correlation id of the request this answers.
	pub id: u64,
	/// Success payload (mutually exclusive with `error`).
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub result: Option<Value>,
	/// Error payload (mutually exclusive with `result`).
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<ErrorPayload>,
}

/// Protocol error details carried by a failed [`Response`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
	/// JSON-RPC style error code (e.g. `-32000`).
	#[serde(default)]
	pub code: i64,
	/// Human-readable message.
	#[serde(default)]
	pub message: String,
	/// Optional extra detail, in whatever shape the remote side sent.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub data: Option<Value>,
}

impl ErrorPayload {
	/// Reads an error payload, keeping whatever fields are usable.
	///
	/// A bare string is taken as the message.
	pub fn from_value(value: Value) -> Self {
		match value {
			Value::String(message) => Self {
				message,
				..Self::default()
			},
			Value::Object(mut fields) => Self {
				code: fields.get("code").and_then(Value::as_i64).unwrap_or_default(),
				message: match fields.remove("message") {
					Some(Value::String(message)) => message,
					Some(other) if !other.is_null() => other.to_string(),
					_ => String::new(),
				},
				data: fields.remove("data").filter(|data| !data.is_null()),
			},
			other => Self {
				message: other.to_string(),
				..Self::default()
			},
		}
	}
}

/// Notification pushed by the remote side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
	/// Notification method name.
	pub method: String,
	/// Notification parameters, absent for parameterless notifications.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub params: Option<Value>,
}

/// Inbound message, classified by [`Message::from_value`].
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Message {
	/// Notification (has `method`).
	Event(Event),
	/// Command response (has `id`).
	Response(Response),
	/// Unknown message type (forward-compatible catch-all).
	Unknown(Value),
}

impl Message {
	/// Classifies an inbound frame by its keys.
	///
	/// A string `method` makes a notification even if an `id` is present;
	/// otherwise an integer `id` makes a response, whatever shape its
	/// `result` or `error` has.
	pub fn from_value(value: Value) -> Self {
		let Value::Object(mut fields) = value else {
			return Message::Unknown(value);
		};

		if let Some(method) = fields.get("method").and_then(Value::as_str).map(str::to_string) {
			return Message::Event(Event {
				method,
				params: fields.remove("params").filter(|params| !params.is_null()),
			});
		}

		match fields.get("id").and_then(Value::as_u64) {
			Some(id) => Message::Response(Response {
				id,
				result: fields.remove("result").filter(|result| !result.is_null()),
				error: fields
					.remove("error")
					.filter(|error| !error.is_null())
					.map(ErrorPayload::from_value),
			}),
			None => Message::Unknown(Value::Object(fields)),
		}
	}
}
