use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use terrain_core::Tile;

/// Prints a persisted tile's header and summary statistics.
#[derive(Args, Debug)]
#[command(arg_required_else_help = true)]
pub struct Subcommand {
	/// Path to a `.terrain` tile file.
	#[arg(required = true)]
	path: PathBuf,
	/// Tile x coordinate (needed to interpret the samples geographically).
	#[arg(required = true)]
	x: u32,
	/// Tile y coordinate.
	#[arg(required = true)]
	y: u32,
	/// Tile zoom level.
	#[arg(required = true)]
	zoom: u8,
}

pub fn run(arguments: &Subcommand) -> Result<()> {
	let bytes = std::fs::read(&arguments.path).with_context(|| format!("reading {}", arguments.path.display()))?;
	let tile = Tile::import(&bytes, arguments.x, arguments.y, arguments.zoom)?;

	println!("tile {}/{}/{}", tile.zoom, tile.x, tile.y);
	println!("  min:   {}", tile.min);
	println!("  max:   {}", tile.max);
	println!("  flags: {:#06b}", tile.flags);
	Ok(())
}
