use chromesync_cli::cli::Cli;
use chromesync_cli::error::SyncError;
use chromesync_cli::output::{self, OutputFormat, ResultBuilder};
use chromesync_cli::{commands, logging};
use clap::Parser;
use tracing::debug;

#[tokio::main]
async fn main() {
	let cli = Cli::parse();
	logging::init_logging(cli.verbose);

	let format = cli.format;
	let command = cli.command.name();

	if let Err(err) = commands::dispatch(cli, format).await {
		handle_error(command, err, format);
		std::process::exit(1);
	}
}

fn handle_error(command: &str, err: SyncError, format: OutputFormat) {
	let cmd_error = err.to_command_error();
	output::print_error_stderr(&cmd_error);

	// Scripts reading stdout still get an envelope.
	if format == OutputFormat::Json {
		let result: output::CommandResult<()> = ResultBuilder::new(command)
			.error(cmd_error.code, &cmd_error.message)
			.build();
		if let Err(e) = output::print_result(&result, format) {
			debug!(error = %e, "Failed to write error envelope");
		}
	}
}
