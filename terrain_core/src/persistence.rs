//! Filesystem layout and atomic writes for the tile database: `<base>/terrainv2/<zoom>/<x>/<y>.terrain`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::debug;

/// Builds the on-disk path for a tile, without touching the filesystem.
#[must_use]
pub fn tile_path(base: &Path, zoom: u8, x: u32, y: u32) -> PathBuf {
	base.join("terrainv2").join(zoom.to_string()).join(x.to_string()).join(format!("{y}.terrain"))
}

/// Reads a persisted tile's raw bytes. A missing file is not an error: it means
/// the tile does not exist yet, reported as `Ok(None)`.
pub fn read_tile(base: &Path, zoom: u8, x: u32, y: u32) -> Result<Option<Vec<u8>>> {
	let path = tile_path(base, zoom, x, y);
	match std::fs::read(&path) {
		Ok(bytes) => Ok(Some(bytes)),
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
		Err(e) => Err(e).with_context(|| format!("reading tile {}", path.display())),
	}
}

/// Atomically writes a tile's bytes: write to a sibling `.part` path, then rename
/// into place. The `.part` file is removed if the write fails partway through.
pub fn write_tile(base: &Path, zoom: u8, x: u32, y: u32, bytes: &[u8]) -> Result<()> {
	let path = tile_path(base, zoom, x, y);
	let dir = path.parent().expect("tile_path always has a parent");
	create_dir_all_tolerant(dir)?;

	let part_path = path.with_extension("terrain.part");
	let result = std::fs::write(&part_path, bytes).with_context(|| format!("writing {}", part_path.display()));
	if let Err(e) = result {
		let _ = std::fs::remove_file(&part_path);
		return Err(e);
	}

	std::fs::rename(&part_path, &path).with_context(|| format!("renaming {} to {}", part_path.display(), path.display()))?;
	debug!("wrote tile {zoom}/{x}/{y} ({} bytes)", bytes.len());
	Ok(())
}

/// Creates a directory and its parents, treating `AlreadyExists` as success so
/// concurrent workers racing on the same directory never fail spuriously.
pub fn create_dir_all_tolerant(dir: &Path) -> Result<()> {
	match std::fs::create_dir_all(dir) {
		Ok(()) => Ok(()),
		Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
		Err(e) => Err(e).with_context(|| format!("creating directory {}", dir.display())),
	}
}
