mod resolve;
mod tabs;
mod watch;

use std::time::Instant;

use serde::Serialize;

use crate::cli::{Cli, Commands};
use crate::config::{Settings, resolve_settings};
use crate::error::Result;
use crate::output::{OutputFormat, ResultBuilder, TextOutput, print_result};

pub use resolve::{Resolution, ResolveReport};
pub use tabs::{TabEntry, TabsReport};
pub use watch::WatchReport;

/// Runs the parsed command line and prints its result.
pub async fn dispatch(cli: Cli, format: OutputFormat) -> Result<()> {
	let started = Instant::now();
	let cwd = std::env::current_dir()?;
	let settings = resolve_settings(&cli.overrides(), &cwd)?;

	match cli.command {
		Commands::Watch(args) => emit("watch", started, format, watch::run(&settings, &args, format).await?),
		Commands::Tabs => emit("tabs", started, format, tabs::run(&settings).await?),
		Commands::Resolve(args) => emit("resolve", started, format, resolve::run(&settings, &args.urls)),
	}
}

fn emit<T: Serialize + TextOutput>(command: &str, started: Instant, format: OutputFormat, data: T) -> Result<()> {
	let result = ResultBuilder::new(command).started_at(started).data(data).build();
	print_result(&result, format)?;
	Ok(())
}

/// Endpoint shown to the user for `settings`.
fn endpoint(settings: &Settings) -> String {
	format!("http://{}:{}", settings.host, settings.port)
}
