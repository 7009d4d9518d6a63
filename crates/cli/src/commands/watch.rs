use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use chromesync_runtime::{
	ChromeWatch, FleetOptions, NotifyWatcherFactory, ProtocolOptions, RemoteError, SessionOptions, WebSocketConnector,
};
use serde::Serialize;
use tracing::info;

use crate::cli::WatchArgs;
use crate::config::Settings;
use crate::discovery::HttpTabSource;
use crate::error::{Result, SyncError};
use crate::output::{OutputFormat, TextOutput};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchReport {
	pub endpoint: String,
	pub mappings: usize,
	/// Tabs that were being watched when the run ended.
	pub tabs_at_shutdown: Vec<String>,
}

impl TextOutput for WatchReport {
	fn write_text(&self, out: &mut dyn Write) -> io::Result<()> {
		writeln!(out, "Stopped watching {} tab(s)", self.tabs_at_shutdown.len())
	}
}

/// Remote errors are user-facing: print them even when logging is quiet.
fn print_remote_error(err: &RemoteError) {
	eprintln!("remote error: {err}");
}

fn seconds(value: f64, flag: &str) -> Result<Duration> {
	Duration::try_from_secs_f64(value).map_err(|_| SyncError::Config(format!("{flag} must be a non-negative number of seconds")))
}

pub fn fleet_options(args: &WatchArgs) -> Result<FleetOptions> {
	let poll_interval = seconds(args.poll_interval, "--poll-interval")?;
	if poll_interval.is_zero() {
		return Err(SyncError::Config("--poll-interval must be greater than zero".into()));
	}
	let session = SessionOptions::default()
		.with_reconnect_delay(seconds(args.reconnect_delay, "--reconnect-delay")?)
		.with_max_pending_updates(args.max_pending)
		.with_protocol(ProtocolOptions::default().with_reporter(print_remote_error));

	Ok(FleetOptions {
		poll_interval,
		retire_closed_tabs: !args.keep_closed_tabs,
		session,
	})
}

pub async fn run(settings: &Settings, args: &WatchArgs, format: OutputFormat) -> Result<WatchReport> {
	if settings.mappings.is_empty() {
		return Err(SyncError::Config(
			"no mappings configured; add them to chromesync.json or pass --map URL=DIR".into(),
		));
	}
	let options = fleet_options(args)?;
	let source = HttpTabSource::new(&settings.host, settings.port)?;
	let endpoint = super::endpoint(settings);

	if format == OutputFormat::Text {
		eprintln!(
			"Watching tabs at {} with {} mapping(s). Press Ctrl+C to stop.",
			endpoint,
			settings.mappings.len()
		);
	}
	for mapping in &settings.mappings {
		info!(url = %mapping.url_prefix, path = %mapping.directory.display(), "Mapping");
	}

	let fleet = ChromeWatch::start(
		Arc::new(source),
		Arc::new(settings.mapper()),
		Arc::new(WebSocketConnector::new()),
		Arc::new(NotifyWatcherFactory),
		options,
	);

	shutdown_signal().await?;
	info!("Shutting down");
	let tabs_at_shutdown = fleet.addresses();
	fleet.stop();

	Ok(WatchReport {
		endpoint,
		mappings: settings.mappings.len(),
		tabs_at_shutdown,
	})
}

#[cfg(unix)]
async fn shutdown_signal() -> Result<()> {
	use anyhow::Context;
	use tokio::signal::unix::{SignalKind, signal};

	let mut sigterm = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
	let mut sigint = signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;
	tokio::select! {
		_ = sigterm.recv() => info!("received SIGTERM"),
		_ = sigint.recv() => info!("received SIGINT"),
	}
	Ok(())
}

#[cfg(not(unix))]
async fn shutdown_signal() -> Result<()> {
	tokio::signal::ctrl_c().await?;
	info!("received Ctrl+C");
	Ok(())
}
