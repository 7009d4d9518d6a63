use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::MakeWriterExt;

pub fn init_logging(verbosity: u8) {
	// 0 = warnings from chromesync, errors from dependencies
	// 1 (-v) = info for chromesync, warn for the rest
	// 2+ (-vv) = debug for everything
	let filter = match verbosity {
		0 => "error,chromesync=warn,chromesync_cli=warn,chromesync_runtime=warn",
		1 => "warn,chromesync=info,chromesync_cli=info,chromesync_runtime=info",
		_ => "debug",
	};

	let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

	let stderr = std::io::stderr.with_max_level(tracing::Level::TRACE);

	tracing_subscriber::fmt()
		.with_env_filter(env_filter)
		.with_writer(stderr)
		.with_target(verbosity > 1)
		.with_level(true)
		.compact()
		.init();
}
