mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
	author,
	version,
	about,
	long_about = None,
	propagate_version = true,
	disable_help_subcommand = true,
)]
struct Cli {
	#[command(subcommand)]
	command: Commands,

	/// Increase logging verbosity; repeat for more detail (-v, -vv, -vvv).
	#[arg(short, long, action = clap::ArgAction::Count, global = true)]
	verbose: u8,
}

#[derive(Subcommand, Debug)]
enum Commands {
	/// Build the terrain pyramid covering a geographic bounding box
	Build(commands::build::Subcommand),

	/// Print a persisted tile's header and summary statistics
	Probe(commands::probe::Subcommand),
}

fn level_for(verbosity: u8) -> log::LevelFilter {
	match verbosity {
		0 => log::LevelFilter::Warn,
		1 => log::LevelFilter::Info,
		2 => log::LevelFilter::Debug,
		_ => log::LevelFilter::Trace,
	}
}

fn main() -> Result<()> {
	let cli = Cli::parse();

	env_logger::Builder::new().filter_level(level_for(cli.verbose)).init();

	run(&cli)
}

fn run(cli: &Cli) -> Result<()> {
	match &cli.command {
		Commands::Build(arguments) => commands::build::run(arguments),
		Commands::Probe(arguments) => commands::probe::run(arguments),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn run_command(arg_vec: Vec<&str>) -> std::result::Result<String, String> {
		match Cli::try_parse_from(arg_vec) {
			Ok(cli) => {
				let msg = format!("{cli:?}");
				run(&cli).map_err(|e| e.to_string())?;
				Ok(msg)
			}
			Err(error) => Err(error.render().to_string()),
		}
	}

	#[test]
	fn help_describes_the_tool() {
		let err = run_command(vec!["terrain"]).unwrap_err();
		assert!(err.contains("Usage: terrain"));
	}

	#[test]
	fn build_subcommand_is_registered() {
		let err = run_command(vec!["terrain", "build"]).unwrap_err();
		assert!(err.to_lowercase().contains("bounding box") || err.contains("Usage"));
	}

	#[test]
	fn probe_subcommand_is_registered() {
		let err = run_command(vec!["terrain", "probe"]).unwrap_err();
		assert!(err.contains("Usage") || err.to_lowercase().contains("tile"));
	}
}
