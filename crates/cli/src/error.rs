use thiserror::Error;

use crate::output::{CommandError, ErrorCode};

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Debug, Error)]
pub enum SyncError {
	#[error("invalid configuration: {0}")]
	Config(String),

	#[error("tab discovery failed: {0}")]
	Discovery(String),

	#[error(transparent)]
	Runtime(#[from] chromesync_runtime::Error),

	#[error(transparent)]
	Io(#[from] std::io::Error),

	#[error(transparent)]
	Json(#[from] serde_json::Error),

	#[error(transparent)]
	Anyhow(#[from] anyhow::Error),
}

impl SyncError {
	pub fn to_command_error(&self) -> CommandError {
		let code = match self {
			SyncError::Config(_) => ErrorCode::InvalidConfig,
			SyncError::Discovery(_) => ErrorCode::DiscoveryFailed,
			SyncError::Runtime(err) if err.is_transport() => ErrorCode::ConnectionFailed,
			SyncError::Runtime(chromesync_runtime::Error::Discovery(_)) => ErrorCode::DiscoveryFailed,
			SyncError::Runtime(chromesync_runtime::Error::Io(_)) | SyncError::Io(_) => ErrorCode::IoError,
			SyncError::Runtime(_) | SyncError::Json(_) | SyncError::Anyhow(_) => ErrorCode::InternalError,
		};
		CommandError {
			code,
			message: format!("{self:#}"),
		}
	}
}
