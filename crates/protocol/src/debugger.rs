//! The subset of the `Debugger` domain used to live-update scripts.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message::{Command, Notification};

/// Opaque identifier the remote runtime assigns to a loaded script.
///
/// Identifiers are only valid until the page's global object is cleared.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScriptId(pub String);

impl ScriptId {
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for ScriptId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<&str> for ScriptId {
	fn from(value: &str) -> Self {
		Self(value.to_string())
	}
}

/// `Debugger.enable`: start reporting parsed scripts.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Enable {}

/// Result of [`Enable`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnableResult {
	#[serde(default)]
	pub debugger_id: Option<String>,
}

impl Command for Enable {
	const METHOD: &'static str = "Debugger.enable";
	type Output = EnableResult;
}

/// `Debugger.setScriptSource`: replace a live script's source text.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetScriptSource {
	pub script_id: ScriptId,
	pub script_source: String,
}

impl SetScriptSource {
	pub fn new(script_id: ScriptId, script_source: impl Into<String>) -> Self {
		Self {
			script_id,
			script_source: script_source.into(),
		}
	}
}

/// Result of [`SetScriptSource`].
///
/// Older browsers report compile failures through `exceptionDetails`, newer
/// ones through `status`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetScriptSourceResult {
	#[serde(default)]
	pub stack_changed: Option<bool>,
	#[serde(default)]
	pub status: Option<String>,
	#[serde(default)]
	pub exception_details: Option<Value>,
}

impl SetScriptSourceResult {
	/// Returns true when the browser accepted the new source.
	pub fn is_ok(&self) -> bool {
		self.exception_details.is_none() && self.status.as_deref().is_none_or(|s| s == "Ok")
	}
}

impl Command for SetScriptSource {
	const METHOD: &'static str = "Debugger.setScriptSource";
	type Output = SetScriptSourceResult;
}

/// `Debugger.scriptParsed` notification.
pub struct ScriptParsed;

/// Parameters of [`ScriptParsed`].
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptParsedParams {
	pub script_id: ScriptId,
	/// Empty for scripts created by `eval` and friends.
	#[serde(default)]
	pub url: String,
	#[serde(default)]
	pub execution_context_id: Option<i64>,
	#[serde(default)]
	pub hash: Option<String>,
	#[serde(default, rename = "sourceMapURL")]
	pub source_map_url: Option<String>,
}

impl Notification for ScriptParsed {
	const METHOD: &'static str = "Debugger.scriptParsed";
	type Params = ScriptParsedParams;
}

/// `Debugger.globalObjectCleared` notification, sent on navigation/reload.
pub struct GlobalObjectCleared;

impl Notification for GlobalObjectCleared {
	const METHOD: &'static str = "Debugger.globalObjectCleared";
	type Params = Value;
}
