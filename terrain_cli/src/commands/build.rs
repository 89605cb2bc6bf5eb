use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use log::info;

use terrain_core::FINE_ZOOM;
use terrain_pyramid::{BuildConfig, Driver, FilesystemSourceProvider};

/// Builds the terrain pyramid covering a geographic bounding box.
#[derive(Args, Debug)]
#[command(arg_required_else_help = true)]
pub struct Subcommand {
	/// Northern edge of the bounding box, in decimal degrees.
	#[arg(required = true)]
	lat_t: f64,
	/// Western edge of the bounding box, in decimal degrees.
	#[arg(required = true)]
	lon_l: f64,
	/// Southern edge of the bounding box, in decimal degrees.
	#[arg(required = true)]
	lat_b: f64,
	/// Eastern edge of the bounding box, in decimal degrees.
	#[arg(required = true)]
	lon_r: f64,
	/// Output (and source) base directory.
	#[arg(required = true)]
	out_path: PathBuf,

	/// Cache memory ceiling, in bytes.
	#[arg(long)]
	cache_budget_bytes: Option<u64>,
	/// Worker thread count for the parallel fine-level pipeline.
	#[arg(long)]
	worker_count: Option<usize>,
}

pub fn run(arguments: &Subcommand) -> Result<()> {
	let mut config = BuildConfig::new(arguments.out_path.clone(), (arguments.lat_t, arguments.lon_l, arguments.lat_b, arguments.lon_r));
	if let Some(budget) = arguments.cache_budget_bytes {
		config.cache_budget_bytes = budget;
	}
	if let Some(workers) = arguments.worker_count {
		config.worker_count = workers;
	}

	info!("building pyramid over ({}, {}) .. ({}, {}) into {}", arguments.lat_t, arguments.lon_l, arguments.lat_b, arguments.lon_r, arguments.out_path.display());

	let provider = FilesystemSourceProvider::new(arguments.out_path.clone());
	let mut driver = Driver::new(config, provider);

	// A single zoom-0 tile covers the whole globe; the driver's own bounding-box
	// clamp prunes every branch that falls outside the requested region, so
	// starting the recursion here visits exactly the tiles the build needs.
	driver.get_terrain(0, 0, 0)?;
	info!("build complete (fine zoom {FINE_ZOOM})");
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use clap::Parser;

	#[derive(Parser)]
	struct Wrapper {
		#[command(flatten)]
		sub: Subcommand,
	}

	#[test]
	fn parses_required_positional_arguments() {
		let wrapper = Wrapper::try_parse_from(["terrain", "41.0", "-106.0", "40.0", "-105.0", "/tmp/out"]).unwrap();
		assert_eq!(wrapper.sub.lat_t, 41.0);
		assert_eq!(wrapper.sub.out_path, PathBuf::from("/tmp/out"));
	}
}
