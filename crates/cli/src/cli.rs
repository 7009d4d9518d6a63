use std::path::PathBuf;

use clap::builder::Styles;
use clap::builder::styling::AnsiColor;
use clap::{Args, Parser, Subcommand};

use crate::config::{MappingEntry, Overrides, parse_map_arg};
use crate::output::OutputFormat;

/// Help colors in the style of cargo.
fn cli_styles() -> Styles {
	Styles::styled()
		.header(AnsiColor::Green.on_default().bold())
		.usage(AnsiColor::Green.on_default().bold())
		.literal(AnsiColor::Cyan.on_default())
		.placeholder(AnsiColor::Cyan.on_default())
}

#[derive(Parser, Debug)]
#[command(name = "chromesync")]
#[command(about = "Push local script edits into running Chrome tabs without reloading")]
#[command(version)]
#[command(styles = cli_styles())]
pub struct Cli {
	/// Increase verbosity (-v info, -vv debug)
	#[arg(short, long, global = true, action = clap::ArgAction::Count)]
	pub verbose: u8,

	/// Output format
	#[arg(short = 'f', long, global = true, value_enum, default_value_t = OutputFormat::Text)]
	pub format: OutputFormat,

	/// Configuration file (default: ./chromesync.json, then the user config directory)
	#[arg(short, long, global = true, value_name = "FILE")]
	pub config: Option<PathBuf>,

	/// Host of the browser's remote-debugging endpoint
	#[arg(long, global = true)]
	pub host: Option<String>,

	/// Remote-debugging port
	#[arg(short, long, global = true)]
	pub port: Option<u16>,

	/// Map a URL prefix to a local directory (repeatable)
	#[arg(short, long = "map", global = true, value_name = "URL=DIR", value_parser = parse_map_arg)]
	pub maps: Vec<MappingEntry>,

	#[command(subcommand)]
	pub command: Commands,
}

impl Cli {
	pub fn overrides(&self) -> Overrides {
		Overrides {
			config: self.config.clone(),
			host: self.host.clone(),
			port: self.port,
			maps: self.maps.clone(),
		}
	}
}

#[derive(Subcommand, Debug)]
pub enum Commands {
	/// Watch every debuggable tab and push script edits until interrupted
	Watch(WatchArgs),

	/// List the browser's debuggable tabs
	Tabs,

	/// Show the local file a script URL maps to
	Resolve(ResolveArgs),
}

impl Commands {
	/// Name reported in the result envelope.
	pub fn name(&self) -> &'static str {
		match self {
			Commands::Watch(_) => "watch",
			Commands::Tabs => "tabs",
			Commands::Resolve(_) => "resolve",
		}
	}
}

#[derive(Args, Debug, Clone)]
pub struct WatchArgs {
	/// Seconds between tab list polls
	#[arg(long, value_name = "SECS", default_value_t = 5.0)]
	pub poll_interval: f64,

	/// Seconds to wait before reconnecting a dropped tab
	#[arg(long, value_name = "SECS", default_value_t = 2.0)]
	pub reconnect_delay: f64,

	/// Edits remembered per tab while it is disconnected
	#[arg(long, value_name = "N", default_value_t = 64)]
	pub max_pending: usize,

	/// Keep sessions for tabs that disappear from the tab list
	#[arg(long)]
	pub keep_closed_tabs: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ResolveArgs {
	/// Script URLs to resolve
	#[arg(required = true, value_name = "URL")]
	pub urls: Vec<String>,
}
