//! Resolves an integer (lat, lon) cell origin to on-disk source files and loads
//! them, hiding the two vendors' naming conventions from the driver.
//!
//! The naming conventions below are grounded in `flt/flt_tile.c` from the
//! original implementation: family A cells live under a `usgs-ned` tree keyed
//! by a lowercase `n40w106`-style base name, family B cells live under an
//! `ASTERv3` tree keyed by the same coordinates in the uppercase
//! `ASTGTMV003_N40W106` form used by that vendor's distribution.

use std::path::{Path, PathBuf};

use anyhow::Result;
use log::debug;

use terrain_core::{load_family_a, load_family_b, FamilyBLayout, SourceRaster, TileEndian};

/// ASTER GDEM v3 ships one 3601x3601 tile per one-degree cell, one file, no
/// internal sub-tiling we need to reconstruct — `FamilyBLayout` still models a
/// grid of blocks generally, but here it is always the trivial 1x1 case.
const ASTER_CELL_SAMPLES: u32 = 3601;

/// Loads source rasters for a single integer (lat, lon) cell, returning
/// `Ok(None)` when the underlying files simply don't exist (`MissingSource`)
/// and `Err` when they exist but fail to parse (`CorruptSource`).
pub trait SourceProvider {
	fn load_a(&self, lat: i32, lon: i32) -> Result<Option<SourceRaster>>;
	fn load_b(&self, lat: i32, lon: i32) -> Result<Option<SourceRaster>>;
}

/// Lowercase `n<lat>w<lon>` / `s<lat>e<lon>` cell base name (2-digit lat,
/// 3-digit lon), e.g. `(40, -106) -> "n40w106"`.
fn fbase_lower(lat: i32, lon: i32) -> String {
	let (ns, lat_mag) = if lat >= 0 { ('n', lat) } else { ('s', -lat) };
	let (ew, lon_mag) = if lon >= 0 { ('e', lon) } else { ('w', -lon) };
	format!("{ns}{lat_mag:02}{ew}{lon_mag:03}")
}

/// The same cell coordinates in the uppercase form ASTER GDEM's own file names use.
fn fbase_upper(lat: i32, lon: i32) -> String {
	fbase_lower(lat, lon).to_ascii_uppercase()
}

/// A [`SourceProvider`] that reads real files laid out under `base_dir`.
pub struct FilesystemSourceProvider {
	base_dir: PathBuf,
}

impl FilesystemSourceProvider {
	#[must_use]
	pub fn new(base_dir: PathBuf) -> FilesystemSourceProvider {
		FilesystemSourceProvider { base_dir }
	}

	fn family_a_paths(&self, lat: i32, lon: i32) -> (PathBuf, PathBuf, PathBuf) {
		let fbase = fbase_lower(lat, lon);
		let dir = self.base_dir.join("usgs-ned").join("data").join(&fbase);
		let stem = format!("float{fbase}_13");
		(dir.join(format!("{stem}.hdr")), dir.join(format!("{stem}.flt")), dir.join(format!("{stem}.prj")))
	}

	fn family_b_paths(&self, lat: i32, lon: i32) -> (PathBuf, PathBuf) {
		let fbase = fbase_upper(lat, lon);
		let body = self.base_dir.join("ASTERv3").join("data").join(format!("ASTGTMV003_{fbase}_dem.tif"));
		let sidecar = self.base_dir.join("ASTERv3").join("zip").join(format!("ASTGTMV003_{fbase}.zip.xml"));
		(sidecar, body)
	}
}

fn exists(path: &Path) -> bool {
	path.is_file()
}

impl SourceProvider for FilesystemSourceProvider {
	fn load_a(&self, lat: i32, lon: i32) -> Result<Option<SourceRaster>> {
		let (header, body, prj) = self.family_a_paths(lat, lon);
		if !exists(&header) || !exists(&body) {
			debug!("family A missing for ({lat}, {lon}): {}", header.display());
			return Ok(None);
		}
		load_family_a(&header, &body, &prj, lat, lon).map(Some)
	}

	fn load_b(&self, lat: i32, lon: i32) -> Result<Option<SourceRaster>> {
		let (sidecar, body) = self.family_b_paths(lat, lon);
		if !exists(&sidecar) || !exists(&body) {
			debug!("family B missing for ({lat}, {lon}): {}", body.display());
			return Ok(None);
		}
		let layout = FamilyBLayout { grid_rows: 1, grid_cols: 1, tile_rows: ASTER_CELL_SAMPLES, tile_cols: ASTER_CELL_SAMPLES, endian: TileEndian::Big };
		load_family_b(&sidecar, &body, layout, lat, lon).map(Some)
	}
}
